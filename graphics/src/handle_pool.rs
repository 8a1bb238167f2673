//! Thread-local buffer handle pool.
//!
//! Handle generation is batched: each thread keeps a free list per device and
//! refills it with [`HANDLE_BATCH`] handles at a time, so a burst of buffer
//! creation costs one device call instead of thousands. Release is immediate
//! and unbatched; a destroyed storage is returned to the device right away so
//! the memory is reclaimable at once.
//!
//! Free lists are keyed by device identity, so tests running several devices
//! on one thread never cross-pollinate handles.

use std::cell::RefCell;
use std::sync::Arc;

use crate::device::{BufferHandle, GeometryDevice};

/// Number of handles requested from the device per refill.
pub const HANDLE_BATCH: usize = 4096;

thread_local! {
    static FREE_LISTS: RefCell<Vec<(usize, Vec<BufferHandle>)>> = const { RefCell::new(Vec::new()) };
}

fn device_key(device: &Arc<dyn GeometryDevice>) -> usize {
    Arc::as_ptr(device) as *const () as usize
}

/// Take one handle from the calling thread's free list, refilling from the
/// device when the list is empty.
pub fn acquire(device: &Arc<dyn GeometryDevice>) -> BufferHandle {
    let key = device_key(device);
    FREE_LISTS.with(|lists| {
        let mut lists = lists.borrow_mut();
        let slot = match lists.iter().position(|(k, _)| *k == key) {
            Some(slot) => slot,
            None => {
                lists.push((key, Vec::new()));
                lists.len() - 1
            }
        };
        let free = &mut lists[slot].1;
        if free.is_empty() {
            *free = device.gen_handles(HANDLE_BATCH);
            log::trace!("handle pool refilled with {HANDLE_BATCH} handles");
        }
        free.pop()
            .expect("geometry device returned an empty handle batch")
    })
}

/// Return a handle to the device, destroying its storage immediately.
pub fn release(device: &Arc<dyn GeometryDevice>, handle: BufferHandle) {
    device.destroy_storage(handle);
}
