//! Zero-copy reads.
//!
//! A segmented read exposes received data in place, inside memory owned by
//! the session library. Instead of copying it out, each segment is handed to
//! the host buffer as a [`BufferFragment`] whose release returns the memory
//! to the library.
//!
//! # Example
//!
//! ```ignore
//! let mut segments = [DataSegment::default(); MAX_READ_SEGMENTS];
//! let rv = api.session_read_segments(sh, &mut segments, u32::MAX);
//! for fragment in fragments_from_segments(&api, sh, &segments, rv) {
//!     buffer.add_fragment(fragment);
//! }
//! ```

use crate::host::BufferFragment;
use crate::vppcom::{DataSegment, SessionHandle, VppCom};
use std::sync::Arc;
use tracing::trace;

/// Wrap the segments covering `rv` bytes into fragments, in order.
///
/// Each fragment carries its own length and, once dropped, frees that many
/// bytes of segment memory for `sh`. A negative `rv` yields no fragments.
///
/// The segments must come from a successful segmented read on `sh` that has
/// not been freed yet.
pub fn fragments_from_segments(
    api: &Arc<dyn VppCom>,
    sh: SessionHandle,
    segments: &[DataSegment],
    rv: i32,
) -> Vec<BufferFragment> {
    let Ok(total) = usize::try_from(rv) else {
        return Vec::new();
    };

    let mut fragments = Vec::new();
    let mut n_bytes = 0;
    for segment in segments {
        if n_bytes >= total {
            break;
        }
        let len = segment.len;
        let api = api.clone();
        // SAFETY: segment memory stays valid until it is freed, which only
        // happens in the release below
        let fragment = unsafe {
            BufferFragment::from_raw_parts(segment.data, len as usize, move || {
                trace!(sh, len, "freeing segments");
                api.session_free_segments(sh, len);
            })
        };
        fragments.push(fragment);
        n_bytes += len as usize;
    }

    debug_assert_eq!(n_bytes, total, "segments must cover the bytes read");
    fragments
}
