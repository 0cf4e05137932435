//! Filter implementations.

pub mod shuffle;

/// Filters applied to a blob section before compression.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Filter {
    /// Byte shuffle
    Shuffle { element_size: usize },
}

/// Encodes some bytes using the specified filter and returns the result.
///
/// # Arguments
///
/// * `filter`: Filter algorithm
/// * `data`: Unfiltered data
pub fn encode(filter: Filter, data: &[u8]) -> Vec<u8> {
    match filter {
        Filter::Shuffle { element_size } => shuffle::shuffle(data, element_size),
    }
}

/// Decodes some bytes using the specified filter and returns the result.
///
/// # Arguments
///
/// * `filter`: Filter algorithm
/// * `data`: Filtered data
pub fn decode(filter: Filter, data: &[u8]) -> Vec<u8> {
    match filter {
        Filter::Shuffle { element_size } => shuffle::deshuffle(data, element_size),
    }
}
