//! RIFF container handling: probing, metadata, limits and malformed input.

use webp_core::{
    decode_rgba32, encode_lossless, encode_lossy, is_webp, read_info, BitstreamFormat,
    DecodeConfig, DecodeRequest, ErrorKind, Limits, Metadata, WebPDecoder, WebPDemuxer, WebPMux,
};

fn pattern(width: u32, height: u32) -> Vec<u8> {
    (0..width * height)
        .flat_map(|i| [(i * 7) as u8, (i * 13) as u8, (i / 3) as u8, 255])
        .collect()
}

/// A RIFF file holding only a VP8X chunk for a `width` x `height` canvas.
fn vp8x_only(width: u32, height: u32) -> Vec<u8> {
    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&22u32.to_le_bytes());
    data.extend_from_slice(b"WEBPVP8X");
    data.extend_from_slice(&10u32.to_le_bytes());
    data.extend_from_slice(&[0, 0, 0, 0]);
    data.extend_from_slice(&(width - 1).to_le_bytes()[..3]);
    data.extend_from_slice(&(height - 1).to_le_bytes()[..3]);
    data
}

#[test]
fn probing() {
    let webp = encode_lossless(&pattern(3, 3), 3, 3, 12, None).unwrap();
    assert!(is_webp(&webp));
    assert!(!is_webp(b"RIFF\0\0\0\0WAVE"));
    assert!(!is_webp(b"RIFF"));

    let info = read_info(&webp).unwrap();
    assert_eq!((info.width, info.height), (3, 3));
    assert_eq!(info.format, BitstreamFormat::Lossless);
    assert!(!info.has_animation);
    assert_eq!(info.frame_count, 1);
}

#[test]
fn huge_canvas_hits_pixel_budget() {
    let data = vp8x_only(100_000, 100_000);
    let config = DecodeConfig::default().limits(Limits::none().max_total_pixels(10_000_000));
    let err = WebPDecoder::new_with_config(&data, &config).err().unwrap();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    let err = DecodeRequest::new(&config, &data).decode_rgba().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);
}

#[test]
fn dimension_and_file_size_limits() {
    let webp = encode_lossy(&pattern(40, 20), 40, 20, 160, 70.0, None).unwrap();
    let narrow = DecodeConfig::default().limits(Limits::none().max_dimensions(32, 32));
    let err = DecodeRequest::new(&narrow, &webp).decode_rgba().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    let tiny = DecodeConfig::default().limits(Limits::none().max_file_size(16));
    let err = DecodeRequest::new(&tiny, &webp).info().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LimitExceeded);

    let roomy = DecodeConfig::default().limits(Limits::none().max_dimensions(40, 20));
    let (_, w, h) = DecodeRequest::new(&roomy, &webp).decode_rgba().unwrap();
    assert_eq!((w, h), (40, 20));
}

#[test]
fn malformed_input() {
    assert_eq!(decode_rgba32(b"").unwrap_err().kind(), ErrorKind::Truncated);
    assert_eq!(
        decode_rgba32(b"RIFF\x04\0\0\0WEBP").unwrap_err().kind(),
        ErrorKind::Truncated
    );
    assert_eq!(
        decode_rgba32(b"GIF89a\0\0\0\0\0\0\0\0\0\0\0\0\0\0").unwrap_err().kind(),
        ErrorKind::Format
    );

    let webp = encode_lossless(&pattern(30, 30), 30, 30, 120, None).unwrap();
    let cut = &webp[..webp.len() / 2];
    let kind = decode_rgba32(cut).unwrap_err().kind();
    assert!(matches!(kind, ErrorKind::Truncated | ErrorKind::Format), "{kind:?}");

    let mut bad_signature = webp.clone();
    bad_signature[20] = 0x2e;
    assert_eq!(decode_rgba32(&bad_signature).unwrap_err().kind(), ErrorKind::Format);

    let mut bad_version = webp.clone();
    bad_version[24] |= 0xe0;
    assert_eq!(decode_rgba32(&bad_version).unwrap_err().kind(), ErrorKind::Unsupported);
}

#[test]
fn metadata_survives_remux() {
    let rgba = pattern(6, 5);
    let webp = encode_lossy(&rgba, 6, 5, 24, 80.0, None).unwrap();
    let pixels = decode_rgba32(&webp).unwrap().0;

    let mut mux = WebPMux::from_data(&webp).unwrap();
    mux.set_metadata(
        Metadata::new()
            .with_icc(b"icc profile".to_vec())
            .with_exif(b"Exif\0\0MM".to_vec())
            .with_xmp(b"<x:xmpmeta/>".to_vec()),
    );
    let tagged = mux.assemble().unwrap();

    let demuxer = WebPDemuxer::new(&tagged).unwrap();
    assert_eq!(demuxer.icc_profile(), Some(&b"icc profile"[..]));
    assert_eq!(demuxer.exif(), Some(&b"Exif\0\0MM"[..]));
    assert_eq!(demuxer.xmp(), Some(&b"<x:xmpmeta/>"[..]));
    assert_eq!((demuxer.canvas_width(), demuxer.canvas_height()), (6, 5));
    assert_eq!(demuxer.num_frames(), 1);

    let decoder = WebPDecoder::new(&tagged).unwrap();
    assert_eq!(decoder.icc_profile().unwrap().as_deref(), Some(&b"icc profile"[..]));
    assert_eq!(decode_rgba32(&tagged).unwrap().0, pixels);

    let mut stripped = WebPMux::from_data(&tagged).unwrap();
    stripped.set_metadata(Metadata::new());
    let plain = stripped.assemble().unwrap();
    assert_eq!(&plain[12..16], b"VP8 ");
    assert_eq!(decode_rgba32(&plain).unwrap().0, pixels);
}

/// Packs `(value, bit count)` pairs least significant bit first.
fn pack_bits(fields: &[(u32, u8)]) -> Vec<u8> {
    let mut out = Vec::new();
    let (mut acc, mut n) = (0u64, 0u8);
    for &(value, count) in fields {
        acc |= u64::from(value) << n;
        n += count;
        while n >= 8 {
            out.push(acc as u8);
            acc >>= 8;
            n -= 8;
        }
    }
    if n > 0 {
        out.push(acc as u8);
    }
    out
}

/// Simple container around one image chunk.
fn simple_file(fourcc: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let padded = payload.len() + payload.len() % 2;
    let mut data = Vec::new();
    data.extend_from_slice(b"RIFF");
    data.extend_from_slice(&(4 + 8 + padded as u32).to_le_bytes());
    data.extend_from_slice(b"WEBP");
    data.extend_from_slice(fourcc);
    data.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    data.extend_from_slice(payload);
    data.resize(8 + 4 + 8 + padded, 0);
    data
}

#[test]
fn truncated_lossless_stream_is_zero_filled() {
    // 4x4, opaque, no transforms, no color cache, no meta codes
    let mut fields = vec![(0x2f, 8), (3, 14), (3, 14), (0, 1), (0, 3), (0, 1), (0, 1), (0, 1)];
    // green: two one-bit symbols, so every pixel costs a bit
    fields.extend([(1, 1), (1, 1), (1, 1), (0x40, 8), (0x80, 8)]);
    // red, blue, alpha and distance: one symbol each, no bits per pixel
    for symbol in [200, 10, 255, 0] {
        fields.extend([(1, 1), (0, 1), (1, 1), (symbol, 8)]);
    }
    let full: Vec<u8> = {
        let mut all = fields.clone();
        all.extend(std::iter::repeat((1, 1)).take(16));
        pack_bits(&all)
    };
    let (pixels, w, h) = decode_rgba32(&simple_file(b"VP8L", &full)).unwrap();
    assert_eq!((w, h), (4, 4));
    assert!(pixels.chunks_exact(4).all(|p| p[0] == 200 && p[2] == 10 && p[3] == 255));

    // keep 40 + 66 header bits and six pixels' worth of the 16
    let (pixels, w, h) = decode_rgba32(&simple_file(b"VP8L", &full[..14])).unwrap();
    assert_eq!((w, h), (4, 4));
    let (head, tail) = pixels.split_at(4 * 4 * 2);
    assert!(head[..16].chunks_exact(4).all(|p| p[0] == 200 && p[3] == 255));
    assert!(tail.iter().all(|&b| b == 0));
}

#[test]
fn truncated_lossy_partition_decodes_best_effort() {
    let (w, h) = (64u32, 64u32);
    let rgba: Vec<u8> = (0..w * h)
        .flat_map(|i| {
            let v = (i.wrapping_mul(2_654_435_761) >> 24) as u8;
            [v, v / 2 + 40, 255 - v, 255]
        })
        .collect();
    let webp = encode_lossy(&rgba, w, h, w as usize * 4, 90.0, None).unwrap();
    assert_eq!(&webp[12..16], b"VP8 ");
    let payload = &webp[20..20 + u32::from_le_bytes([webp[16], webp[17], webp[18], webp[19]]) as usize];
    let (full, _, _) = decode_rgba32(&webp).unwrap();

    // first partition intact, token partition cut in half
    let tag = u32::from_le_bytes([payload[0], payload[1], payload[2], 0]);
    let first_partition_end = 10 + (tag >> 5) as usize;
    let cut = first_partition_end + (payload.len() - first_partition_end) / 2;
    let (partial, pw, ph) = decode_rgba32(&simple_file(b"VP8 ", &payload[..cut])).unwrap();
    assert_eq!((pw, ph), (w, h));
    assert_eq!(partial.len(), full.len());
    assert_ne!(partial, full);

    // the top-left corner lies well inside the data that survived
    let stride = w as usize * 4;
    for y in 0..8 {
        assert_eq!(partial[y * stride..][..32], full[y * stride..][..32], "row {y}");
    }
}

#[test]
fn decoding_can_be_cancelled() {
    struct AlwaysStop;
    impl webp_core::Stop for AlwaysStop {
        fn check(&self) -> Result<(), webp_core::StopReason> {
            Err(webp_core::StopReason::Cancelled)
        }
    }

    let rgba = pattern(24, 16);
    let config = DecodeConfig::default();
    for webp in [
        encode_lossless(&rgba, 24, 16, 96, None).unwrap(),
        encode_lossy(&rgba, 24, 16, 96, 60.0, None).unwrap(),
    ] {
        let err = DecodeRequest::new(&config, &webp)
            .stop(&AlwaysStop)
            .decode_rgba()
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);

        let mut decoder = WebPDecoder::new(&webp).unwrap();
        decoder.set_stop(Some(&AlwaysStop));
        let mut buf = vec![0u8; decoder.output_buffer_size()];
        assert_eq!(decoder.read_image(&mut buf).unwrap_err().kind(), ErrorKind::Cancelled);
    }
}
