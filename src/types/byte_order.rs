#[cfg(target_endian = "big")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Big;

#[cfg(target_endian = "little")]
pub const NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

#[cfg(target_endian = "big")]
pub const NON_NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Little;

#[cfg(target_endian = "little")]
pub const NON_NATIVE_BYTE_ORDER: ByteOrder = ByteOrder::Big;

/// Byte order / endianness of a matrix blob payload.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ByteOrder {
    /// Big Endian
    Big,
    /// Little Endian
    Little,
}

impl ByteOrder {
    /// Reverse the bytes of each `element_size` sized element in place.
    ///
    /// Used to read a payload written on a host with the other byte order.
    pub fn swap_elements(data: &mut [u8], element_size: usize) {
        if element_size > 1 {
            data.chunks_exact_mut(element_size)
                .for_each(|element| element.reverse());
        }
    }
}
