/// Character data of one element, accumulated across text events.
///
/// Only the two-byte form `110xxxxx 10xxxxxx` is decoded, and only the low
/// byte of the resulting code point is kept. Every other byte becomes the
/// char with the same value. Three- and four-byte sequences are therefore
/// not recovered.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TextAccumulator {
    text: String,
    lead: Option<u8>,
}

impl TextAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.push_byte(byte);
        }
    }

    fn push_byte(&mut self, byte: u8) {
        if let Some(lead) = self.lead.take() {
            if byte & 0xC0 == 0x80 {
                let code = (u32::from(lead & 0x1F) << 6) | u32::from(byte & 0x3F);
                self.text.push(char::from((code & 0xFF) as u8));
                return;
            }
            self.text.push(char::from(lead));
        }
        if byte & 0xE0 == 0xC0 {
            self.lead = Some(byte);
        } else {
            self.text.push(char::from(byte));
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.lead.is_none()
    }

    /// Returns the decoded text and resets the accumulator. A dangling lead
    /// byte is kept as is.
    pub fn take(&mut self) -> String {
        if let Some(lead) = self.lead.take() {
            self.text.push(char::from(lead));
        }
        std::mem::take(&mut self.text)
    }
}

pub fn decode(bytes: &[u8]) -> String {
    let mut acc = TextAccumulator::new();
    acc.push_bytes(bytes);
    acc.take()
}

#[cfg(test)]
mod tests {
    use super::{TextAccumulator, decode};

    #[test]
    fn ascii_passes_through() {
        assert_eq!(decode(b"plain text 42"), "plain text 42");
    }

    #[test]
    fn two_byte_sequences_fold_to_latin1() {
        assert_eq!(decode("café".as_bytes()), "café");
        assert_eq!(decode("Ünïcødé".as_bytes()), "Ünïcødé");
    }

    #[test]
    fn code_points_above_ff_keep_only_the_low_byte() {
        // U+0141 (Ł) folds to 0x41.
        assert_eq!(decode("Ł".as_bytes()), "A");
    }

    #[test]
    fn wider_forms_are_not_decoded() {
        let decoded = decode("€".as_bytes());
        assert_eq!(decoded.chars().count(), 3);
        assert_eq!(decoded.chars().next(), Some('\u{e2}'));
    }

    #[test]
    fn sequence_split_across_chunks_still_folds() {
        let bytes = "é".as_bytes();
        let mut acc = TextAccumulator::new();
        acc.push_bytes(&bytes[..1]);
        assert!(!acc.is_empty());
        acc.push_bytes(&bytes[1..]);
        assert_eq!(acc.take(), "é");
        assert!(acc.is_empty());
    }

    #[test]
    fn dangling_lead_byte_is_kept() {
        assert_eq!(decode(&[b'a', 0xC3]), "a\u{c3}");
        assert_eq!(decode(&[0xC3, b'b']), "\u{c3}b");
    }
}
