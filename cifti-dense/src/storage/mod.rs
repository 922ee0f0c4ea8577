//! 行/列存储后端.
//!
//! 所有后端对外表现一致: 第 0 维为行长度, 一行由其余各维的索引
//! (`index_select`, 对应 `dims[1..]`) 选出; 按列访问只适用于二维矩阵.

use itertools::Itertools;

use crate::error::{CiftiError, CiftiResult};

mod memory;
mod on_disk;
#[cfg(feature = "remote")]
mod remote;

pub use memory::InMemoryStorage;
pub use on_disk::OnDiskStorage;
#[cfg(feature = "remote")]
pub use remote::RemoteStorage;

/// 存储后端的公共能力.
pub trait RowStorage {
    /// 矩阵各维的长度.
    fn dims(&self) -> &[usize];

    /// 将 `index_select` 选出的行读入 `out`.
    fn get_row(&mut self, index_select: &[usize], out: &mut [f32]) -> CiftiResult<()>;

    /// 读取二维矩阵的第 `index` 列 (每行的第 `index` 个元素).
    fn get_column(&mut self, index: usize, out: &mut [f32]) -> CiftiResult<()>;

    /// 写入 `index_select` 选出的行.
    fn set_row(&mut self, index_select: &[usize], data: &[f32]) -> CiftiResult<()>;

    /// 写入二维矩阵的第 `index` 列.
    fn set_column(&mut self, index: usize, data: &[f32]) -> CiftiResult<()>;

    /// 数据是否完全位于内存中.
    fn is_in_memory(&self) -> bool {
        false
    }
}

/// 后端类型.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BackendKind {
    /// 内存.
    Memory,
    /// 磁盘上的 NIfTI 文件.
    OnDisk,
    /// 远程 HTTP 服务.
    Remote,
}

/// 当前使用的后端.
#[derive(Debug)]
pub enum StorageBackend {
    /// 内存.
    Memory(InMemoryStorage),

    /// 磁盘.
    OnDisk(OnDiskStorage),

    /// 远程.
    #[cfg(feature = "remote")]
    Remote(RemoteStorage),
}

impl StorageBackend {
    /// 后端类型.
    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Memory(_) => BackendKind::Memory,
            Self::OnDisk(_) => BackendKind::OnDisk,
            #[cfg(feature = "remote")]
            Self::Remote(_) => BackendKind::Remote,
        }
    }

    /// 磁盘后端.
    #[inline]
    pub fn as_on_disk(&self) -> Option<&OnDiskStorage> {
        match self {
            Self::OnDisk(s) => Some(s),
            _ => None,
        }
    }

    fn inner(&self) -> &dyn RowStorage {
        match self {
            Self::Memory(s) => s,
            Self::OnDisk(s) => s,
            #[cfg(feature = "remote")]
            Self::Remote(s) => s,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn RowStorage {
        match self {
            Self::Memory(s) => s,
            Self::OnDisk(s) => s,
            #[cfg(feature = "remote")]
            Self::Remote(s) => s,
        }
    }
}

impl RowStorage for StorageBackend {
    fn dims(&self) -> &[usize] {
        self.inner().dims()
    }

    fn get_row(&mut self, index_select: &[usize], out: &mut [f32]) -> CiftiResult<()> {
        self.inner_mut().get_row(index_select, out)
    }

    fn get_column(&mut self, index: usize, out: &mut [f32]) -> CiftiResult<()> {
        self.inner_mut().get_column(index, out)
    }

    fn set_row(&mut self, index_select: &[usize], data: &[f32]) -> CiftiResult<()> {
        self.inner_mut().set_row(index_select, data)
    }

    fn set_column(&mut self, index: usize, data: &[f32]) -> CiftiResult<()> {
        self.inner_mut().set_column(index, data)
    }

    fn is_in_memory(&self) -> bool {
        self.inner().is_in_memory()
    }
}

/// 校验行访问参数, 返回行号.
///
/// 行号以 `index_select[0]` 变化最快: `i1 + d1 * (i2 + d2 * (...))`.
pub(crate) fn row_number(dims: &[usize], index_select: &[usize], len: usize) -> CiftiResult<usize> {
    let tail = dims.get(1..).unwrap_or_default();
    if index_select.len() != tail.len() {
        return Err(CiftiError::bad_length(
            index_select.len(),
            format!("行选择索引个数应为 {}", tail.len()),
        ));
    }
    let row_len = dims.first().copied().unwrap_or(0);
    if len != row_len {
        return Err(CiftiError::bad_length(len, format!("行长度应为 {row_len}")));
    }
    let mut row = 0;
    for (&i, &d) in index_select.iter().zip(tail).rev() {
        if i >= d {
            return Err(CiftiError::IndexOutOfRange { index: i, len: d });
        }
        row = row * d + i;
    }
    Ok(row)
}

/// 校验列访问参数. 只适用于二维矩阵.
pub(crate) fn check_column(dims: &[usize], index: usize, len: usize) -> CiftiResult<()> {
    if dims.len() != 2 {
        return Err(CiftiError::WrongRank {
            expected: 2,
            found: dims.len(),
        });
    }
    if index >= dims[0] {
        return Err(CiftiError::IndexOutOfRange {
            index,
            len: dims[0],
        });
    }
    if len != dims[1] {
        return Err(CiftiError::bad_length(len, format!("列长度应为 {}", dims[1])));
    }
    Ok(())
}

/// 以里程表顺序遍历 `dims[1..]` 的全部行选择索引.
pub(crate) fn for_each_row<F>(dims: &[usize], mut op: F) -> CiftiResult<()>
where
    F: FnMut(&[usize]) -> CiftiResult<()>,
{
    match dims.get(1..) {
        None | Some([]) => op(&[]),
        Some(tail) => {
            for index_select in tail.iter().map(|&d| 0..d).multi_cartesian_product() {
                op(&index_select)?;
            }
            Ok(())
        }
    }
}

/// 将 `src` 的全部行逐行复制到 `dst`. 两者维度必须相同.
pub(crate) fn copy_rows(src: &mut dyn RowStorage, dst: &mut dyn RowStorage) -> CiftiResult<()> {
    let dims = src.dims().to_vec();
    if dst.dims() != dims.as_slice() {
        return Err(CiftiError::bad_length(
            dst.dims().len(),
            format!("复制目标的维度应为 {dims:?}"),
        ));
    }
    let mut row = try_zeroed(dims.first().copied().unwrap_or(0))?;
    for_each_row(&dims, |index_select| {
        src.get_row(index_select, &mut row)?;
        dst.set_row(index_select, &row)
    })
}

/// 分配以 0 填充的缓冲. 分配失败时返回 `Err(CiftiError::Allocation)`.
pub(crate) fn try_zeroed(len: usize) -> CiftiResult<Vec<f32>> {
    let bytes = (len as u64).saturating_mul(std::mem::size_of::<f32>() as u64);
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| CiftiError::Allocation(bytes))?;
    buf.resize(len, 0.0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::{check_column, copy_rows, for_each_row, row_number, InMemoryStorage, RowStorage};
    use crate::error::CiftiError;

    #[test]
    fn test_row_number() {
        let dims = [4, 3, 2];
        assert_eq!(row_number(&dims, &[0, 0], 4).unwrap(), 0);
        assert_eq!(row_number(&dims, &[2, 0], 4).unwrap(), 2);
        assert_eq!(row_number(&dims, &[0, 1], 4).unwrap(), 3);
        assert_eq!(row_number(&dims, &[2, 1], 4).unwrap(), 5);
        assert!(matches!(
            row_number(&dims, &[3, 0], 4),
            Err(CiftiError::IndexOutOfRange { index: 3, len: 3 })
        ));
        assert!(matches!(row_number(&dims, &[0], 4), Err(CiftiError::BadLength { .. })));
        assert!(matches!(row_number(&dims, &[0, 0], 5), Err(CiftiError::BadLength { .. })));
        assert_eq!(row_number(&[7], &[], 7).unwrap(), 0);
    }

    #[test]
    fn test_check_column() {
        assert!(check_column(&[5, 10], 4, 10).is_ok());
        assert!(matches!(check_column(&[5, 10], 5, 10), Err(CiftiError::IndexOutOfRange { .. })));
        assert!(matches!(check_column(&[5, 10], 0, 5), Err(CiftiError::BadLength { .. })));
        assert!(matches!(
            check_column(&[5, 10, 2], 0, 10),
            Err(CiftiError::WrongRank { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn test_odometer_visits_every_row_once() {
        let mut seen = Vec::new();
        for_each_row(&[2, 3, 2], |idx| {
            seen.push(row_number(&[2, 3, 2], idx, 2).unwrap());
            Ok(())
        })
        .unwrap();
        seen.sort_unstable();
        assert_eq!(seen, (0..6).collect::<Vec<_>>());

        let mut count = 0;
        for_each_row(&[5], |idx| {
            assert!(idx.is_empty());
            count += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_copy_rows() {
        let dims = [3, 2, 2];
        let mut src = InMemoryStorage::new(&dims).unwrap();
        for_each_row(&dims, |idx| {
            let base = (idx[0] * 10 + idx[1] * 100) as f32;
            src.set_row(idx, &[base, base + 1.0, base + 2.0])
        })
        .unwrap();

        let mut dst = InMemoryStorage::new(&dims).unwrap();
        copy_rows(&mut src, &mut dst).unwrap();
        let mut row = [0f32; 3];
        dst.get_row(&[1, 1], &mut row).unwrap();
        assert_eq!(row, [110.0, 111.0, 112.0]);

        let mut other = InMemoryStorage::new(&[3, 4]).unwrap();
        assert!(copy_rows(&mut src, &mut other).is_err());
    }
}
