//! Animated WebP: encode frames, decode them back composited and raw.

use webp_core::{
    decode_animation_frames, decode_animation_raw_frames, encode_animation, AnimationConfig,
    AnimationDecoder, AnimationFrame, BlendMethod, DecodeConfig, DisposeMethod, ErrorKind, Limits,
    LoopCount, WebPDecoder,
};

const RED: [u8; 4] = [255, 0, 0, 255];
const CLEAR: [u8; 4] = [0, 0, 0, 0];

fn solid(width: u32, height: u32, rgba: [u8; 4]) -> Vec<u8> {
    rgba.repeat((width * height) as usize)
}

fn red_then_clear(first_dispose: DisposeMethod, background_bgra: [u8; 4]) -> Vec<u8> {
    let frames = [
        AnimationFrame::new(solid(1, 1, RED), 1, 1, 100).dispose(first_dispose),
        AnimationFrame::new(solid(1, 1, CLEAR), 1, 1, 100).blend(BlendMethod::AlphaBlend),
    ];
    let config = AnimationConfig {
        background_color: background_bgra,
        ..AnimationConfig::default()
    };
    encode_animation(&frames, &config).unwrap()
}

#[test]
fn transparent_frame_blends_over_previous() {
    let webp = red_then_clear(DisposeMethod::None, [0, 0, 0, 0]);
    let animation = decode_animation_frames(&webp, &Limits::default()).unwrap();
    assert_eq!(animation.frames.len(), 2);
    assert_eq!(animation.frames[0].rgba, RED);
    assert_eq!(animation.frames[1].rgba, RED);
}

#[test]
fn disposed_frame_reveals_background() {
    // BGRA in the file: opaque blue.
    let webp = red_then_clear(DisposeMethod::Background, [255, 0, 0, 255]);
    let animation = decode_animation_frames(&webp, &Limits::default()).unwrap();
    assert_eq!(animation.background_color, [255, 0, 0, 255]);
    assert_eq!(animation.frames[0].rgba, RED);
    assert_eq!(animation.frames[1].rgba, [0, 0, 255, 255]);
}

#[test]
fn background_override() {
    let webp = red_then_clear(DisposeMethod::Background, [255, 0, 0, 255]);
    let mut decoder = WebPDecoder::new(&webp).unwrap();
    decoder.set_background_color([0, 200, 0, 255]).unwrap();
    let mut buf = vec![0u8; decoder.output_buffer_size()];
    assert_eq!(decoder.read_frame(&mut buf).unwrap(), Some(100));
    assert_eq!(decoder.read_frame(&mut buf).unwrap(), Some(100));
    assert_eq!(buf, [0, 200, 0, 255]);
    assert_eq!(decoder.read_frame(&mut buf).unwrap(), None);
}

#[test]
fn canvas_starts_as_background() {
    let frames = [AnimationFrame::new(solid(2, 2, RED), 2, 2, 40).at(2, 2)];
    let config = AnimationConfig {
        background_color: [10, 20, 30, 255],
        canvas_size: Some((4, 4)),
        ..AnimationConfig::default()
    };
    let webp = encode_animation(&frames, &config).unwrap();
    let animation = decode_animation_frames(&webp, &Limits::default()).unwrap();
    let canvas = &animation.frames[0];
    assert_eq!((canvas.x, canvas.y, canvas.width, canvas.height), (0, 0, 4, 4));
    assert_eq!(&canvas.rgba[..4], &[30, 20, 10, 255]);
    assert_eq!(&canvas.rgba[(2 * 4 + 2) * 4..][..4], &RED);
}

#[test]
fn decoder_reports_timestamps() {
    let frames: Vec<AnimationFrame> = [30u32, 50, 70]
        .iter()
        .enumerate()
        .map(|(i, &ms)| AnimationFrame::new(solid(3, 2, [i as u8 * 80, 0, 0, 255]), 3, 2, ms))
        .collect();
    let config = AnimationConfig {
        loop_count: LoopCount::from(3),
        ..AnimationConfig::default()
    };
    let webp = encode_animation(&frames, &config).unwrap();

    let mut decoder = AnimationDecoder::new(&webp).unwrap();
    let info = decoder.info();
    assert_eq!((info.canvas_width, info.canvas_height, info.frame_count), (3, 2, 3));
    assert_eq!(info.loop_count, LoopCount::from(3));
    assert_eq!(decoder.loop_duration(), 150);

    let decoded = decoder.decode_all().unwrap();
    let times: Vec<(u32, u32)> = decoded.iter().map(|f| (f.timestamp_ms, f.duration_ms)).collect();
    assert_eq!(times, [(0, 30), (30, 50), (80, 70)]);
    for (frame, original) in decoded.iter().zip(&frames) {
        assert_eq!(frame.data, original.rgba);
    }
    assert!(!decoder.has_more_frames());

    decoder.reset().unwrap();
    assert_eq!(decoder.by_ref().count(), 3);
}

#[test]
fn raw_frames_from_still_image() {
    let rgba = solid(5, 3, [1, 2, 3, 4]);
    let webp = webp_core::encode_lossless(&rgba, 5, 3, 20, None).unwrap();
    let raw = decode_animation_raw_frames(&webp, &Limits::default()).unwrap();
    assert_eq!(raw.frames.len(), 1);
    assert_eq!(raw.frames[0].rgba, rgba);
    assert_eq!(raw.frames[0].lossless, Some(true));
    assert!(AnimationDecoder::new(&webp).is_err());
}

#[test]
fn lossy_frames_roundtrip_approximately() {
    let frames = [
        AnimationFrame::new(solid(16, 16, [200, 60, 20, 255]), 16, 16, 80),
        AnimationFrame::new(solid(16, 16, [20, 60, 200, 255]), 16, 16, 80),
    ];
    let config = AnimationConfig {
        lossless: false,
        quality: 90.0,
        ..AnimationConfig::default()
    };
    let webp = encode_animation(&frames, &config).unwrap();
    let animation = decode_animation_frames(&webp, &Limits::default()).unwrap();
    for (decoded, original) in animation.frames.iter().zip(&frames) {
        let worst = decoded
            .rgba
            .iter()
            .zip(&original.rgba)
            .map(|(a, b)| a.abs_diff(*b))
            .max()
            .unwrap();
        assert!(worst <= 8, "max channel error {worst}");
    }
}

#[test]
fn frame_count_limit() {
    let webp = red_then_clear(DisposeMethod::None, [0; 4]);
    let limits = Limits::default().max_frame_count(1);
    let err = decode_animation_frames(&webp, &limits).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    // two 1x1 snapshots need 8 bytes
    let err = decode_animation_frames(&webp, &Limits::default().max_animation_memory(7)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
    assert!(decode_animation_frames(&webp, &Limits::default().max_animation_memory(8)).is_ok());

    let config = DecodeConfig::default().limits(Limits::default().max_animation_duration_ms(150));
    let err = AnimationDecoder::new_with_config(&webp, &config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
}
