//! Byte shuffle filter

/// Apply the byte shuffle filter.
///
/// For an array of N elements where each element is M bytes, the filter writes the 0th byte of
/// each element first, followed by the 1st byte of each element, and so on. Runs of similar high
/// order bytes then sit next to each other, which compresses much better for small integers and
/// for floating point values with a narrow range.
///
/// # Arguments
///
/// * `data`: Bytes to shuffle. The length must be a multiple of `element_size`.
/// * `element_size`: Size of each element in bytes.
pub fn shuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    assert_eq!(data.len() % element_size, 0);
    let mut result = Vec::with_capacity(data.len());
    let num_elements = data.len() / element_size;
    for i in 0..element_size {
        let mut src_index = i;
        for _ in 0..num_elements {
            result.push(data[src_index]);
            src_index += element_size;
        }
    }
    result
}

/// Decode the byte shuffle filter.
///
/// This function inverts [shuffle].
///
/// # Arguments
///
/// * `data`: Bytes to deshuffle.
/// * `element_size`: Size of each element in bytes.
// Benchmarking showed that the "slow" vector initialisation was faster for the non-unrolled case.
#[allow(clippy::slow_vector_initialization)]
pub fn deshuffle(data: &[u8], element_size: usize) -> Vec<u8> {
    assert_eq!(data.len() % element_size, 0);
    let mut result = Vec::with_capacity(data.len());
    // Indexing a mutable u8 slice is measurably faster than pushing.
    result.resize(data.len(), 0);
    let m = result.as_mut_slice();
    let num_elements = data.len() / element_size;
    let mut dest_index = 0;
    // Unroll the inner loop for the common 4 and 8 byte cases (see benches/shuffle.rs).
    if element_size == 4 {
        for i in 0..num_elements {
            let mut src_index = i;
            m[dest_index] = data[src_index];
            src_index += num_elements;
            dest_index += 1;
            m[dest_index] = data[src_index];
            src_index += num_elements;
            dest_index += 1;
            m[dest_index] = data[src_index];
            src_index += num_elements;
            dest_index += 1;
            m[dest_index] = data[src_index];
            dest_index += 1;
        }
    } else if element_size == 8 {
        for i in 0..num_elements {
            let mut src_index = i;
            for _ in 0..7 {
                m[dest_index] = data[src_index];
                src_index += num_elements;
                dest_index += 1;
            }
            m[dest_index] = data[src_index];
            dest_index += 1;
        }
    } else {
        for i in 0..num_elements {
            let mut src_index = i;
            for _ in 0..element_size {
                m[dest_index] = data[src_index];
                src_index += num_elements;
                dest_index += 1;
            }
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shuffle_4() {
        let data = [0, 1, 2, 3, 4, 5, 6, 7];
        let expected = [0, 4, 1, 5, 2, 6, 3, 7];
        assert_eq!(expected.as_ref(), shuffle(&data, 4));
    }

    #[test]
    fn test_shuffle_8() {
        let data = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        let expected = [0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15];
        assert_eq!(expected.as_ref(), shuffle(&data, 8));
    }

    #[test]
    fn test_deshuffle_2() {
        let shuffled = [0, 2, 4, 6, 1, 3, 5, 7];
        let expected = [0, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(expected.as_ref(), deshuffle(&shuffled, 2));
    }

    #[test]
    fn test_deshuffle_4() {
        let shuffled = [0, 4, 1, 5, 2, 6, 3, 7];
        let expected = [0, 1, 2, 3, 4, 5, 6, 7];
        assert_eq!(expected.as_ref(), deshuffle(&shuffled, 4));
    }

    #[test]
    fn test_deshuffle_8() {
        let shuffled = [0, 8, 1, 9, 2, 10, 3, 11, 4, 12, 5, 13, 6, 14, 7, 15];
        let expected = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];
        assert_eq!(expected.as_ref(), deshuffle(&shuffled, 8));
    }

    #[test]
    fn test_shuffle_inverse_odd_size() {
        let data: Vec<u8> = (0..24).collect();
        assert_eq!(data, deshuffle(&shuffle(&data, 3), 3));
        assert_eq!(data, deshuffle(&shuffle(&data, 1), 1));
    }

    #[test]
    fn test_shuffle_empty() {
        assert!(shuffle(&[], 8).is_empty());
        assert!(deshuffle(&[], 8).is_empty());
    }
}
