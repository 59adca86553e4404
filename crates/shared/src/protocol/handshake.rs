use bytes::{BufMut, BytesMut};

/// Display name carried in the ServerInit message.
pub const DISPLAY_NAME: &str = "OpenKVM";

/// Pixel layout advertised to every client. Clients may ask for something
/// else with SetPixelFormat; the server ignores the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelFormat {
    pub bits_per_pixel: u8,
    pub depth: u8,
    pub big_endian: u8,
    pub true_color: u8,
    pub red_max: u16,
    pub green_max: u16,
    pub blue_max: u16,
    pub red_shift: u8,
    pub green_shift: u8,
    pub blue_shift: u8,
}

impl Default for PixelFormat {
    /// 32bpp true-color, 8 bits per channel, red in the high byte.
    fn default() -> Self {
        Self {
            bits_per_pixel: 32,
            depth: 24,
            big_endian: 0,
            true_color: 1,
            red_max: 0xff,
            green_max: 0xff,
            blue_max: 0xff,
            red_shift: 16,
            green_shift: 8,
            blue_shift: 0,
        }
    }
}

/// ServerInit message: display geometry, pixel layout and name, sent once
/// per connection after authentication (RFC 6143 §7.3.2).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerInit {
    pub name: String,
    pub width: u16,
    pub height: u16,
    pub pixel_format: PixelFormat,
}

impl ServerInit {
    pub fn new(width: u16, height: u16) -> Self {
        Self {
            name: DISPLAY_NAME.to_string(),
            width,
            height,
            pixel_format: PixelFormat::default(),
        }
    }

    /// Serialize to the wire layout. Note: depth is written before
    /// bits-per-pixel.
    pub fn to_bytes(&self) -> Vec<u8> {
        let pf = &self.pixel_format;
        let mut msg = BytesMut::with_capacity(24 + self.name.len());

        msg.put_u16(self.width);
        msg.put_u16(self.height);
        msg.put_u8(pf.depth);
        msg.put_u8(pf.bits_per_pixel);
        msg.put_u8(pf.big_endian);
        msg.put_u8(pf.true_color);
        msg.put_u16(pf.red_max);
        msg.put_u16(pf.green_max);
        msg.put_u16(pf.blue_max);
        msg.put_u8(pf.red_shift);
        msg.put_u8(pf.green_shift);
        msg.put_u8(pf.blue_shift);
        msg.put_bytes(0, 3);
        msg.put_u32(self.name.len() as u32);
        msg.put_slice(self.name.as_bytes());

        msg.to_vec()
    }
}
