const ESC: u8 = 0x1b;
const GS: u8 = 0x1d;

use super::logo::Raster;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Center,
    Right,
}

/// Accumulates an ESC/POS command stream.
#[derive(Debug, Default, Clone)]
pub struct EscPos {
    buf: Vec<u8>,
}

impl EscPos {
    pub fn new() -> Self {
        Self::default()
    }

    /// `ESC @`: reset the printer to its power-on defaults.
    pub fn init(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'@']);
        self
    }

    pub fn align(&mut self, align: Align) -> &mut Self {
        let n = match align {
            Align::Left => 0,
            Align::Center => 1,
            Align::Right => 2,
        };
        self.buf.extend_from_slice(&[ESC, b'a', n]);
        self
    }

    /// `GS ! n` with both size nibbles zero.
    pub fn normal_size(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[GS, b'!', 0]);
        self
    }

    /// Printable ASCII passes through; anything else is folded to a close
    /// ASCII form, since the default code page cannot print UTF-8.
    pub fn text(&mut self, text: &str) -> &mut Self {
        for ch in text.chars() {
            match ch {
                '\n' | ' '..='~' => self.buf.push(ch as u8),
                'à' | 'á' | 'â' | 'ä' => self.buf.push(b'a'),
                'è' | 'é' | 'ê' | 'ë' => self.buf.push(b'e'),
                'ì' | 'í' | 'î' | 'ï' => self.buf.push(b'i'),
                'ò' | 'ó' | 'ô' | 'ö' => self.buf.push(b'o'),
                'ù' | 'ú' | 'û' | 'ü' => self.buf.push(b'u'),
                'À' | 'Á' => self.buf.push(b'A'),
                'È' | 'É' => self.buf.push(b'E'),
                '€' => self.buf.extend_from_slice(b"EUR"),
                _ => self.buf.push(b'?'),
            }
        }
        self
    }

    pub fn line(&mut self, text: &str) -> &mut Self {
        self.text(text).text("\n")
    }

    /// `GS v 0 0 xL xH yL yH d...`: print a raster bit image at normal density.
    pub fn raster(&mut self, image: &Raster) -> &mut Self {
        let [xl, xh] = image.width_bytes().to_le_bytes();
        let [yl, yh] = image.height().to_le_bytes();
        self.buf.extend_from_slice(&[GS, b'v', b'0', 0, xl, xh, yl, yh]);
        self.buf.extend_from_slice(image.data());
        self.buf.push(b'\n');
        self
    }

    /// `ESC d n`: print and feed n lines.
    pub fn feed(&mut self, lines: u8) -> &mut Self {
        self.buf.extend_from_slice(&[ESC, b'd', lines]);
        self
    }

    /// `GS V A n`: feed n dots then partial cut.
    pub fn cut(&mut self) -> &mut Self {
        self.buf.extend_from_slice(&[GS, b'V', b'A', 3]);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
