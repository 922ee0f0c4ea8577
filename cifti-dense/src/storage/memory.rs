use ndarray::{ArrayD, ArrayView1, ArrayViewD, ArrayViewMut1, ArrayViewMutD, Axis, Ix2, IxDyn};

use super::{check_column, row_number, try_zeroed, RowStorage};
use crate::error::{CiftiError, CiftiResult};

cfg_if::cfg_if! {
    if #[cfg(feature = "rayon")] {
        use rayon::prelude::*;
    }
}

/// 内存后端. 数据按行主序稠密存储.
///
/// 内部数组的形状为维度的逆序 `[.., d1, d0]`, 因此一行是一段连续内存.
#[derive(Debug, Clone)]
pub struct InMemoryStorage {
    dims: Vec<usize>,
    data: ArrayD<f32>,
}

impl InMemoryStorage {
    /// 分配以 0 填充的矩阵.
    ///
    /// 内存不足时返回 `Err(CiftiError::Allocation)`, 携带请求的字节数.
    pub fn new(dims: &[usize]) -> CiftiResult<Self> {
        let len = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or(CiftiError::Allocation(u64::MAX))?;
        let buf = try_zeroed(len)?;
        let shape: Vec<usize> = dims.iter().rev().copied().collect();
        let data = ArrayD::from_shape_vec(IxDyn(&shape), buf)
            .map_err(|_| CiftiError::bad_length(len, format!("与维度 {dims:?} 不符")))?;
        Ok(Self {
            dims: dims.to_vec(),
            data,
        })
    }

    /// 底层数组, 形状为维度的逆序.
    #[inline]
    pub fn data(&self) -> &ArrayD<f32> {
        &self.data
    }

    fn row_view(&self, index_select: &[usize]) -> ArrayViewD<'_, f32> {
        let mut view = self.data.view();
        for &i in index_select.iter().rev() {
            view = view.index_axis_move(Axis(0), i);
        }
        view
    }

    fn row_view_mut(&mut self, index_select: &[usize]) -> ArrayViewMutD<'_, f32> {
        let mut view = self.data.view_mut();
        for &i in index_select.iter().rev() {
            view = view.index_axis_move(Axis(0), i);
        }
        view
    }

    fn matrix_rank_error(&self) -> CiftiError {
        CiftiError::WrongRank {
            expected: 2,
            found: self.dims.len(),
        }
    }
}

impl RowStorage for InMemoryStorage {
    fn dims(&self) -> &[usize] {
        &self.dims
    }

    fn get_row(&mut self, index_select: &[usize], out: &mut [f32]) -> CiftiResult<()> {
        row_number(&self.dims, index_select, out.len())?;
        let row = self.row_view(index_select);
        match row.as_slice() {
            Some(s) => out.copy_from_slice(s),
            None => out.iter_mut().zip(row.iter()).for_each(|(o, &v)| *o = v),
        }
        Ok(())
    }

    fn get_column(&mut self, index: usize, out: &mut [f32]) -> CiftiResult<()> {
        check_column(&self.dims, index, out.len())?;
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                if let Some(flat) = self.data.as_slice() {
                    flat.par_chunks_exact(self.dims[0])
                        .zip(out.par_iter_mut())
                        .for_each(|(row, o)| *o = row[index]);
                    return Ok(());
                }
            }
        }
        let matrix = self
            .data
            .view()
            .into_dimensionality::<Ix2>()
            .map_err(|_| self.matrix_rank_error())?;
        ArrayViewMut1::from(out).assign(&matrix.column(index));
        Ok(())
    }

    fn set_row(&mut self, index_select: &[usize], data: &[f32]) -> CiftiResult<()> {
        row_number(&self.dims, index_select, data.len())?;
        let mut row = self.row_view_mut(index_select);
        match row.as_slice_mut() {
            Some(s) => s.copy_from_slice(data),
            None => row.iter_mut().zip(data).for_each(|(o, &v)| *o = v),
        }
        Ok(())
    }

    fn set_column(&mut self, index: usize, data: &[f32]) -> CiftiResult<()> {
        check_column(&self.dims, index, data.len())?;
        let row_len = self.dims[0];
        let rank_error = self.matrix_rank_error();
        cfg_if::cfg_if! {
            if #[cfg(feature = "rayon")] {
                if let Some(flat) = self.data.as_slice_mut() {
                    flat.par_chunks_exact_mut(row_len)
                        .zip(data.par_iter())
                        .for_each(|(row, &v)| row[index] = v);
                    return Ok(());
                }
            }
        }
        let mut matrix = self
            .data
            .view_mut()
            .into_dimensionality::<Ix2>()
            .map_err(|_| rank_error)?;
        debug_assert_eq!(matrix.ncols(), row_len);
        matrix.column_mut(index).assign(&ArrayView1::from(data));
        Ok(())
    }

    fn is_in_memory(&self) -> bool {
        true
    }
}
