//! Tight-encoded FramebufferUpdate messages with JPEG tile payloads
//! (RFC 6143 §7.6, tight extension).

use anyhow::{Context, Result};
use bytes::{BufMut, BytesMut};
use image::ColorType;
use image::codecs::jpeg::JpegEncoder;
use shared::codec::encode_length;
use shared::protocol::{Frame, Rect};

use super::Codec;

const ENCODING_TIGHT: i32 = 7;
const TIGHT_JPEG: u8 = 0x90;
const DEFAULT_QUALITY: u8 = 75;

pub struct TightJpeg {
    quality: u8,
}

impl TightJpeg {
    /// `quality` of 0 selects the default of 75.
    pub fn new(quality: u8) -> Self {
        Self {
            quality: if quality == 0 { DEFAULT_QUALITY } else { quality },
        }
    }
}

impl Codec for TightJpeg {
    fn framebuffer_update(&self, rects: &[Rect]) -> Result<Vec<u8>> {
        let mut payload = BytesMut::new();
        payload.put_u8(0); // FramebufferUpdate
        payload.put_u8(0); // padding
        payload.put_u16(rects.len() as u16);

        for rect in rects {
            payload.put_u16(rect.x as u16);
            payload.put_u16(rect.y as u16);
            payload.put_u16(rect.frame.width() as u16);
            payload.put_u16(rect.frame.height() as u16);
            payload.put_i32(ENCODING_TIGHT);
            payload.put_u8(TIGHT_JPEG);

            let jpeg = encode_tile(&rect.frame, self.quality)?;
            payload.put_slice(&encode_length(jpeg.len()));
            payload.put_slice(&jpeg);
        }

        Ok(payload.to_vec())
    }
}

fn encode_tile(frame: &Frame, quality: u8) -> Result<Vec<u8>> {
    // JPEG carries no alpha; repack RGBA to RGB.
    let mut rgb = Vec::with_capacity(frame.data().len() / 4 * 3);
    for pixel in frame.data().chunks_exact(4) {
        rgb.extend_from_slice(&pixel[..3]);
    }

    let mut jpeg = Vec::new();
    JpegEncoder::new_with_quality(&mut jpeg, quality)
        .encode(&rgb, frame.width(), frame.height(), ColorType::Rgb8)
        .context("jpeg encode tile")?;
    Ok(jpeg)
}
