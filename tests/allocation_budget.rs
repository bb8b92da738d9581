//! A bitstream that claims more pixels than its canvas must be rejected
//! before the decoder allocates for it.

use std::alloc::{GlobalAlloc, Layout, System};
use std::sync::atomic::{AtomicUsize, Ordering};

use webp_core::{DecodeConfig, DecodeRequest, ErrorKind, Limits};

struct LargestAllocation;

static LARGEST: AtomicUsize = AtomicUsize::new(0);

unsafe impl GlobalAlloc for LargestAllocation {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        LARGEST.fetch_max(layout.size(), Ordering::Relaxed);
        System.alloc(layout)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static ALLOCATOR: LargestAllocation = LargestAllocation;

fn tiny_canvas_with(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&(4 + 18 + 8 + payload.len() as u32).to_le_bytes());
    data.extend_from_slice(b"WEBPVP8X");
    data.extend_from_slice(&10u32.to_le_bytes());
    data.extend_from_slice(&[0; 10]);
    data.extend_from_slice(fourcc);
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(payload);
    data
}

// Both cases share one test so no other test allocates concurrently.
#[test]
fn oversized_bitstreams_stay_within_budget() {
    let config = DecodeConfig::default().limits(
        Limits::none()
            .max_total_pixels(100)
            .max_memory(1 << 20),
    );

    // VP8L header for 16384x16384, followed by one-symbol codes' worth of zeros.
    let mut lossless = vec![0x2f, 0xff, 0xff, 0xff, 0x0f];
    lossless.extend_from_slice(&[0; 15]);
    let lossless = tiny_canvas_with(b"VP8L", &lossless);

    // VP8 key frame for 16383x16383.
    let mut lossy = vec![0x50, 0x01, 0x00, 0x9d, 0x01, 0x2a, 0xff, 0x3f, 0xff, 0x3f];
    lossy.extend_from_slice(&[0; 16]);
    let lossy = tiny_canvas_with(b"VP8 ", &lossy);

    LARGEST.store(0, Ordering::Relaxed);
    for data in [&lossless, &lossy] {
        let err = DecodeRequest::new(&config, data).decode_rgba().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format, "{err}");
    }
    let largest = LARGEST.load(Ordering::Relaxed);
    assert!(largest < 1 << 20, "largest allocation {largest} bytes");
}
