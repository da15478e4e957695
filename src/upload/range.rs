use super::error::{Result, UploadError};

/// Byte range of one part inside the source file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    /// 1-based part index
    pub index: u32,
    pub offset: u64,
    pub length: u64,
}

impl PartPlan {
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Compute the byte range for `part_index` out of `total_parts`.
///
/// Every part is `part_size` long except the final one, which takes whatever
/// remains of the file. Fails when the caller's part math does not fit the
/// actual file size, or when the final part would be empty.
pub fn plan(file_size: u64, part_size: u64, part_index: u32, total_parts: u32) -> Result<PartPlan> {
    let invalid = |offset: u64, length: i128| UploadError::InvalidRange {
        part_index,
        total_parts,
        offset,
        length,
        file_size,
    };

    if part_size == 0 || part_index == 0 || part_index > total_parts {
        return Err(invalid(0, 0));
    }

    let offset = (part_index as u64 - 1)
        .checked_mul(part_size)
        .ok_or_else(|| invalid(u64::MAX, 0))?;

    let length: i128 = if part_index == total_parts {
        file_size as i128 - offset as i128
    } else {
        part_size as i128
    };

    if offset >= file_size || length <= 0 || offset as i128 + length > file_size as i128 {
        return Err(invalid(offset, length));
    }

    Ok(PartPlan {
        index: part_index,
        offset,
        length: length as u64,
    })
}

/// Number of parts needed to cover `file_size` bytes
pub fn part_count(file_size: u64, part_size: u64) -> Result<u32> {
    if part_size == 0 {
        return Err(UploadError::config("partSize must be greater than zero"));
    }
    u32::try_from(file_size.div_ceil(part_size))
        .map_err(|_| UploadError::config("partSize too small: more than u32::MAX parts"))
}
