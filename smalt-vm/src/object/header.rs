use super::{RawValue, Word, WORD_SIZE};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// Low bits of the header's meta word.
    pub struct HeaderFlags: Word {
        /// Payload is raw bytes instead of tagged slots.
        const BINARY = 0b01;
        /// The object was moved during the running collection; the class
        /// word holds the forwarding address.
        const RELOCATED = 0b10;
    }
}

const FLAG_BITS: u32 = 2;

#[repr(C)]
#[derive(Debug)]
/// Two-word object header: a meta word packing the size and the flags,
/// followed by the class pointer.
///
/// The size counts data slots for ordinary objects and bytes for binary
/// objects; binary payloads occupy whole words, padded with zeros.
pub struct ObjectHeader {
    meta: Word,
    class: RawValue,
}

static_assertions::const_assert_eq!(core::mem::size_of::<ObjectHeader>(), 2 * WORD_SIZE);

impl ObjectHeader {
    /// Words occupied by the header itself.
    pub const WORDS: usize = 2;

    /// Initialize a header in place.
    pub fn init(&mut self, size: usize, flags: HeaderFlags, class: RawValue) {
        self.meta = (size as Word) << FLAG_BITS | flags.bits();
        self.class = class;
    }

    /// Data slot count (ordinary) or byte count (binary).
    pub fn size(&self) -> usize {
        self.meta >> FLAG_BITS
    }

    /// Flag set of this object.
    pub fn flags(&self) -> HeaderFlags {
        HeaderFlags::from_bits_truncate(self.meta)
    }

    /// Whether the payload is raw bytes.
    pub fn is_binary(&self) -> bool {
        self.flags().contains(HeaderFlags::BINARY)
    }

    /// Whether the object carries a forwarding address.
    pub fn is_relocated(&self) -> bool {
        self.flags().contains(HeaderFlags::RELOCATED)
    }

    /// Class of the object. Meaningless while [`Self::is_relocated`].
    pub fn class(&self) -> RawValue {
        debug_assert!(!self.is_relocated());
        self.class
    }

    /// Replace the class pointer (collector slot update).
    pub fn set_class(&mut self, class: RawValue) {
        self.class = class;
    }

    /// Mark the object moved, stashing the new address in the class word.
    pub fn relocate_to(&mut self, forward: RawValue) {
        self.meta |= HeaderFlags::RELOCATED.bits();
        self.class = forward;
    }

    /// Forwarding address of a relocated object.
    pub fn forwarding(&self) -> RawValue {
        debug_assert!(self.is_relocated());
        self.class
    }

    /// Words occupied by the payload.
    pub fn payload_word_len(&self) -> usize {
        if self.is_binary() {
            self.size().div_ceil(WORD_SIZE)
        } else {
            self.size()
        }
    }

    /// Total words occupied by the object, header included.
    pub fn object_word_len(&self) -> usize {
        Self::WORDS + self.payload_word_len()
    }
}

/// Footprint in bytes of an ordinary object with `slots` data slots.
pub(crate) fn ordinary_byte_len(slots: usize) -> usize {
    (ObjectHeader::WORDS + slots) * WORD_SIZE
}

/// Footprint in bytes of a binary object with `bytes` data bytes.
pub(crate) fn binary_byte_len(bytes: usize) -> usize {
    (ObjectHeader::WORDS + bytes.div_ceil(WORD_SIZE)) * WORD_SIZE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(size: usize, flags: HeaderFlags) -> ObjectHeader {
        let mut header = ObjectHeader {
            meta: 0,
            class: RawValue::ZERO,
        };
        header.init(size, flags, RawValue::ZERO);
        header
    }

    #[test]
    fn size_and_flags_share_the_meta_word() {
        let plain = header(5, HeaderFlags::empty());
        assert_eq!(plain.size(), 5);
        assert!(!plain.is_binary());
        assert_eq!(plain.object_word_len(), 7);

        let binary = header(WORD_SIZE + 1, HeaderFlags::BINARY);
        assert_eq!(binary.size(), WORD_SIZE + 1);
        assert!(binary.is_binary());
        // bytes round up to whole words
        assert_eq!(binary.payload_word_len(), 2);
    }

    #[test]
    fn forwarding_reuses_the_class_word() {
        let mut header = header(3, HeaderFlags::empty());
        assert!(!header.is_relocated());

        let forward = RawValue::from_word(0x1000);
        header.relocate_to(forward);
        assert!(header.is_relocated());
        assert_eq!(header.forwarding(), forward);
        // size is still readable during the collection
        assert_eq!(header.size(), 3);
    }
}
