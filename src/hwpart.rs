use alloc::boxed::Box;
use log::{debug, error, warn};

use crate::{DfuError, MmcDevice};

fn access_part<D: MmcDevice + ?Sized>(dev: &mut D, part: u32) -> Result<(), DfuError> {
    if dev.active_partition() == part {
        return Ok(());
    }

    dev.switch_partition(part).map_err(|e| {
        error!("Cannot switch to partition {}: {}", part, e);
        DfuError::Switch { partition: part }
    })
}

/// Keeps a hardware partition selected until released or dropped.
///
/// Dropping the guard without [`PartitionGuard::release`] still switches back,
/// but any failure can then only be logged.
pub struct PartitionGuard<'a, D: MmcDevice + ?Sized> {
    dev: &'a mut D,
    saved: u32,
    released: bool,
}

impl<'a, D: MmcDevice + ?Sized> PartitionGuard<'a, D> {
    /// Records the active partition and switches to `part`.
    pub fn enter(dev: &'a mut D, part: u32) -> Result<Self, DfuError> {
        let saved = dev.active_partition();
        access_part(dev, part)?;
        debug!("Switched hardware partition {} -> {}", saved, part);

        Ok(Self {
            dev,
            saved,
            released: false,
        })
    }

    /// Partition that was active before the guard was entered.
    pub fn saved(&self) -> u32 {
        self.saved
    }

    pub fn device(&mut self) -> &mut D {
        &mut *self.dev
    }

    /// Switches back to the saved partition.
    pub fn release(mut self) -> Result<(), DfuError> {
        self.released = true;
        access_part(&mut *self.dev, self.saved)
    }
}

impl<D: MmcDevice + ?Sized> Drop for PartitionGuard<'_, D> {
    fn drop(&mut self) {
        if !self.released && access_part(&mut *self.dev, self.saved).is_err() {
            warn!("Hardware partition {} not restored", self.saved);
        }
    }
}

/// Runs `body` with hardware partition `target` selected, then restores the
/// previously active partition.
///
/// The restore is attempted even when `body` fails. If it fails,
/// [`DfuError::PartitionNotRestored`] is returned with the error of `body`,
/// if any, as its cause.
pub fn with_partition<D, T, F>(dev: &mut D, target: Option<u32>, body: F) -> Result<T, DfuError>
where
    D: MmcDevice + ?Sized,
    F: FnOnce(&mut D) -> Result<T, DfuError>,
{
    let Some(part) = target else {
        return body(dev);
    };

    let mut guard = PartitionGuard::enter(dev, part)?;
    let saved = guard.saved();
    let result = body(guard.device());

    match guard.release() {
        Ok(()) => result,
        Err(_) => Err(DfuError::PartitionNotRestored {
            partition: saved,
            cause: result.err().map(Box::new),
        }),
    }
}
