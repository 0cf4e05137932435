//! Matrix blob codec.
//!
//! A blob is a fixed 32 byte header followed by a payload.
//!
//! | Offset | Size | Content                                                      |
//! |--------|------|--------------------------------------------------------------|
//! | 0      | 4    | Magic `MXB\x01`                                              |
//! | 4      | 1    | Flags: bit 0 sparse, bit 1 compressed, bit 2 big endian      |
//! | 5      | 1    | Element type tag (see [DType::tag])                          |
//! | 6      | 2    | Reserved, zero                                               |
//! | 8      | 8    | Rows, little endian `u64`                                    |
//! | 16     | 8    | Columns, little endian `u64`                                 |
//! | 24     | 8    | Number of stored values, little endian `u64`                 |
//!
//! A dense payload holds `rows * cols` values in row-major order. A sparse payload holds the CSR
//! row pointers (`rows + 1` × `u32`), the column indices (`nnz` × `u32`) and the values (`nnz`
//! elements), one section after the other. Payload numbers are written in the byte order named
//! by the flags and swapped on read if that differs from the host.
//!
//! Compressed payloads apply the byte shuffle filter to each section, then zlib to the whole.

use crate::compression;
use crate::error::MatrixStoreError;
use crate::filters::{self, Filter};
use crate::matrix::{with_matrix, AnyMatrix, Matrix, SparseMatrix};
use crate::models::DType;
use crate::types::byte_order::NATIVE_BYTE_ORDER;
use crate::types::{ByteOrder, Element};

use ndarray::Array2;
// Bring trait into scope to use as_bytes methods.
use zerocopy::AsBytes;

const MAGIC: &[u8; 4] = b"MXB\x01";
pub const HEADER_LEN: usize = 32;

const FLAG_SPARSE: u8 = 0b001;
const FLAG_COMPRESSED: u8 = 0b010;
const FLAG_BIG_ENDIAN: u8 = 0b100;
const KNOWN_FLAGS: u8 = FLAG_SPARSE | FLAG_COMPRESSED | FLAG_BIG_ENDIAN;

const INDEX_SIZE: usize = std::mem::size_of::<u32>();

/// Decoded blob header.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct BlobHeader {
    pub dtype: DType,
    pub sparse: bool,
    pub compressed: bool,
    pub byte_order: ByteOrder,
    pub rows: usize,
    pub cols: usize,
    pub nnz: usize,
}

fn corrupt(reason: impl Into<String>) -> MatrixStoreError {
    MatrixStoreError::CorruptBlob {
        reason: reason.into(),
    }
}

impl BlobHeader {
    fn to_bytes(self) -> [u8; HEADER_LEN] {
        let mut flags = 0;
        if self.sparse {
            flags |= FLAG_SPARSE;
        }
        if self.compressed {
            flags |= FLAG_COMPRESSED;
        }
        if self.byte_order == ByteOrder::Big {
            flags |= FLAG_BIG_ENDIAN;
        }
        let mut header = [0; HEADER_LEN];
        header[0..4].copy_from_slice(MAGIC);
        header[4] = flags;
        header[5] = self.dtype.tag();
        header[8..16].copy_from_slice(&(self.rows as u64).to_le_bytes());
        header[16..24].copy_from_slice(&(self.cols as u64).to_le_bytes());
        header[24..32].copy_from_slice(&(self.nnz as u64).to_le_bytes());
        header
    }

    /// Parse and validate the header at the start of a blob.
    pub fn parse(blob: &[u8]) -> Result<Self, MatrixStoreError> {
        if blob.len() < HEADER_LEN {
            return Err(corrupt(format!(
                "blob of {} bytes is shorter than the header",
                blob.len()
            )));
        }
        if &blob[0..4] != MAGIC {
            return Err(corrupt("bad magic number"));
        }
        let flags = blob[4];
        if flags & !KNOWN_FLAGS != 0 {
            return Err(corrupt(format!("unknown flags {:#010b}", flags)));
        }
        let dtype = DType::from_tag(blob[5])
            .ok_or_else(|| corrupt(format!("unknown element type tag {}", blob[5])))?;
        let read_len = |offset: usize| -> Result<usize, MatrixStoreError> {
            let mut bytes = [0; 8];
            bytes.copy_from_slice(&blob[offset..offset + 8]);
            usize::try_from(u64::from_le_bytes(bytes))
                .map_err(|_| corrupt("dimension does not fit in memory"))
        };
        let header = Self {
            dtype,
            sparse: flags & FLAG_SPARSE != 0,
            compressed: flags & FLAG_COMPRESSED != 0,
            byte_order: if flags & FLAG_BIG_ENDIAN != 0 {
                ByteOrder::Big
            } else {
                ByteOrder::Little
            },
            rows: read_len(8)?,
            cols: read_len(16)?,
            nnz: read_len(24)?,
        };
        let cells = header
            .rows
            .checked_mul(header.cols)
            .ok_or_else(|| corrupt("shape overflows"))?;
        if header.sparse && header.rows.checked_add(1).is_none() {
            return Err(corrupt("row count overflows"));
        }
        if header.sparse && header.nnz > cells {
            return Err(corrupt("more stored values than cells"));
        }
        if !header.sparse && header.nnz != cells {
            return Err(corrupt("dense value count does not match shape"));
        }
        Ok(header)
    }

    /// Lengths in bytes of each payload section, with the element size used to shuffle it.
    fn sections(&self) -> Result<Vec<(usize, usize)>, MatrixStoreError> {
        let size = self.dtype.size_of();
        let overflow = || corrupt("payload length overflows");
        if self.sparse {
            let indptr = self
                .rows
                .checked_add(1)
                .and_then(|rows| rows.checked_mul(INDEX_SIZE))
                .ok_or_else(overflow)?;
            let indices = self.nnz.checked_mul(INDEX_SIZE).ok_or_else(overflow)?;
            let values = self.nnz.checked_mul(size).ok_or_else(overflow)?;
            Ok(vec![
                (indptr, INDEX_SIZE),
                (indices, INDEX_SIZE),
                (values, size),
            ])
        } else {
            let values = self.nnz.checked_mul(size).ok_or_else(overflow)?;
            Ok(vec![(values, size)])
        }
    }
}

fn to_u32(values: &[usize]) -> Result<Vec<u32>, MatrixStoreError> {
    values
        .iter()
        .map(|value| u32::try_from(*value).map_err(MatrixStoreError::from))
        .collect()
}

fn encode_typed<T: Element>(matrix: &Matrix<T>, compress: bool) -> Result<Vec<u8>, MatrixStoreError> {
    let (rows, cols) = matrix.shape();
    let size = T::DTYPE.size_of();
    let (sections, nnz): (Vec<(Vec<u8>, usize)>, usize) = match matrix {
        Matrix::Dense(array) => {
            let values = match array.as_slice() {
                Some(slice) => slice.as_bytes().to_vec(),
                None => array.iter().copied().collect::<Vec<T>>().as_bytes().to_vec(),
            };
            (vec![(values, size)], rows * cols)
        }
        Matrix::Sparse(sparse) => {
            let indptr = to_u32(sparse.indptr())?;
            let indices = to_u32(sparse.indices())?;
            (
                vec![
                    (indptr.as_bytes().to_vec(), INDEX_SIZE),
                    (indices.as_bytes().to_vec(), INDEX_SIZE),
                    (sparse.data().as_bytes().to_vec(), size),
                ],
                sparse.nnz(),
            )
        }
    };
    let header = BlobHeader {
        dtype: T::DTYPE,
        sparse: matrix.is_sparse(),
        compressed: compress,
        byte_order: NATIVE_BYTE_ORDER,
        rows,
        cols,
        nnz,
    };
    let mut payload = Vec::with_capacity(sections.iter().map(|(s, _)| s.len()).sum());
    for (section, element_size) in &sections {
        if compress {
            payload.extend(filters::encode(
                Filter::Shuffle {
                    element_size: *element_size,
                },
                section,
            ));
        } else {
            payload.extend_from_slice(section);
        }
    }
    if compress {
        payload = compression::compress_zlib(&payload)?;
    }
    let mut blob = Vec::with_capacity(HEADER_LEN + payload.len());
    blob.extend_from_slice(&header.to_bytes());
    blob.extend(payload);
    Ok(blob)
}

/// Serialise a matrix to an uncompressed blob.
pub fn serialize(matrix: &AnyMatrix) -> Result<Vec<u8>, MatrixStoreError> {
    with_matrix!(matrix, m => encode_typed(m, false))
}

/// Serialise a matrix to a compressed blob.
pub fn serialize_compressed(matrix: &AnyMatrix) -> Result<Vec<u8>, MatrixStoreError> {
    with_matrix!(matrix, m => encode_typed(m, true))
}

/// Copy bytes into a freshly allocated, correctly aligned vector of elements.
fn values_from_bytes<T: AsBytes + zerocopy::FromBytes + num_traits::Zero + Clone>(
    bytes: &[u8],
) -> Vec<T> {
    let mut values = vec![T::zero(); bytes.len() / std::mem::size_of::<T>()];
    values.as_bytes_mut().copy_from_slice(bytes);
    values
}

fn to_usize(values: Vec<u32>) -> Vec<usize> {
    values.into_iter().map(|value| value as usize).collect()
}

fn decode_typed<T: Element>(
    header: &BlobHeader,
    mut sections: Vec<Vec<u8>>,
) -> Result<Matrix<T>, MatrixStoreError> {
    let values = sections
        .pop()
        .ok_or_else(|| corrupt("missing value section"))?;
    let values = values_from_bytes::<T>(&values);
    if header.sparse {
        let indices = to_usize(values_from_bytes::<u32>(&sections[1]));
        let indptr = to_usize(values_from_bytes::<u32>(&sections[0]));
        let sparse = SparseMatrix::from_parts(header.rows, header.cols, indptr, indices, values)?;
        if sparse.data().iter().any(|value| value.is_zero()) {
            return Err(corrupt("explicit zero stored in sparse matrix"));
        }
        Ok(Matrix::Sparse(sparse))
    } else {
        let array = Array2::from_shape_vec((header.rows, header.cols), values)
            .map_err(|err| corrupt(err.to_string()))?;
        Ok(Matrix::Dense(array))
    }
}

/// Deserialise a blob produced by [serialize] or [serialize_compressed].
///
/// Compression is detected from the header. Every malformed input yields
/// [MatrixStoreError::CorruptBlob].
pub fn deserialize(blob: &[u8]) -> Result<AnyMatrix, MatrixStoreError> {
    let header = BlobHeader::parse(blob)?;
    let layout = header.sections()?;
    let expected = layout
        .iter()
        .try_fold(0usize, |total, (len, _)| total.checked_add(*len))
        .ok_or_else(|| corrupt("payload length overflows"))?;
    let payload = &blob[HEADER_LEN..];
    let capacity = if header.compressed {
        payload.len().saturating_mul(compression::MAX_DEFLATE_RATIO)
    } else {
        payload.len()
    };
    if expected > capacity {
        return Err(corrupt(format!(
            "header describes {} payload bytes but only {} are present",
            expected,
            payload.len()
        )));
    }
    let payload = if header.compressed {
        compression::decompress_zlib(payload, expected)
            .map_err(|err| corrupt(format!("decompression failed: {}", err)))?
    } else {
        payload.to_vec()
    };
    if payload.len() != expected {
        return Err(corrupt(format!(
            "payload is {} bytes, expected {}",
            payload.len(),
            expected
        )));
    }
    let mut offset = 0;
    let mut sections = Vec::with_capacity(layout.len());
    for (len, element_size) in layout {
        let raw = &payload[offset..offset + len];
        offset += len;
        let mut section = if header.compressed {
            filters::decode(Filter::Shuffle { element_size }, raw)
        } else {
            raw.to_vec()
        };
        if header.byte_order != NATIVE_BYTE_ORDER {
            ByteOrder::swap_elements(&mut section, element_size);
        }
        sections.push(section);
    }
    let matrix = match header.dtype {
        DType::Int8 => decode_typed::<i8>(&header, sections)?.into(),
        DType::Int16 => decode_typed::<i16>(&header, sections)?.into(),
        DType::Int32 => decode_typed::<i32>(&header, sections)?.into(),
        DType::Int64 => decode_typed::<i64>(&header, sections)?.into(),
        DType::Uint8 => decode_typed::<u8>(&header, sections)?.into(),
        DType::Uint16 => decode_typed::<u16>(&header, sections)?.into(),
        DType::Uint32 => decode_typed::<u32>(&header, sections)?.into(),
        DType::Uint64 => decode_typed::<u64>(&header, sections)?.into(),
        DType::Float32 => decode_typed::<f32>(&header, sections)?.into(),
        DType::Float64 => decode_typed::<f64>(&header, sections)?.into(),
    };
    Ok(matrix)
}
