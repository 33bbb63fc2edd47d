//! Shared-memory buffers for bitmap cursors

use super::State;
use crate::error::{PlatformError, Result};
use crate::input::cursor::BitmapPixels;
use memmap2::MmapMut;
use std::fs::File;
use std::os::fd::{AsFd, FromRawFd};
use wayland_client::protocol::{wl_buffer::WlBuffer, wl_shm, wl_shm::WlShm};
use wayland_client::QueueHandle;

const MEMFD_NAME: &[u8] = b"skylight-cursor\0";

fn memfd(len: usize) -> Result<File> {
    let fd = unsafe { libc::memfd_create(MEMFD_NAME.as_ptr().cast(), libc::MFD_CLOEXEC) };
    if fd < 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    let file = unsafe { File::from_raw_fd(fd) };
    file.set_len(len as u64)?;
    Ok(file)
}

/// Copies `pixels` into a fresh pool and returns a buffer over all of it
///
/// The pool is destroyed right away; the buffer keeps the memory alive.
pub(super) fn bitmap_buffer(shm: &WlShm, pixels: &BitmapPixels, qh: &QueueHandle<State>) -> Result<WlBuffer> {
    let stride = pixels.stride();
    let len = (stride * pixels.size.height) as usize;
    if len == 0 || pixels.data.len() != len {
        return Err(PlatformError::unavailable(
            "cursor bitmap",
            format!("{} bytes for {}x{}", pixels.data.len(), pixels.size.width, pixels.size.height),
        ));
    }

    let file = memfd(len)?;
    let mut map = unsafe { MmapMut::map_mut(&file)? };
    map.copy_from_slice(&pixels.data);
    map.flush()?;

    let pool = shm.create_pool(file.as_fd(), len as i32, qh, ());
    let buffer = pool.create_buffer(
        0,
        pixels.size.width as i32,
        pixels.size.height as i32,
        stride as i32,
        wl_shm::Format::Argb8888,
        qh,
        (),
    );
    pool.destroy();
    Ok(buffer)
}
