//! 可随机访问的单文件 NIfTI 数据.
//!
//! 数据区按行组织: 行长度为逻辑维度的第 0 维, 第 `r` 行从
//! `vox_offset + r * row_len * element_size` 开始.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::consts::{CIFTI_RESERVED_DIMS, NIFTI_TYPE_FLOAT32};
use crate::error::{CiftiError, CiftiResult};

mod header;

pub use header::Endian;
pub(crate) use header::{Extension, NiftiHeader};

/// 去掉前导的保留维度.
fn matrix_dims(dims: &[usize]) -> &[usize] {
    if dims.len() > CIFTI_RESERVED_DIMS {
        &dims[CIFTI_RESERVED_DIMS..]
    } else {
        dims
    }
}

/// 已打开的 NIfTI 文件.
#[derive(Debug)]
pub(crate) struct NiftiFile {
    file: File,
    path: PathBuf,
    header: NiftiHeader,
    element_size: usize,
    row_len: usize,
    rows: usize,
    scaling: Option<(f64, f64)>,
}

impl NiftiFile {
    /// 以只读方式打开文件并读取 header 与扩展.
    ///
    /// 行的划分默认取 header 中保留维度之后的维度, 可通过 [`Self::set_shape`] 修改.
    pub fn open(path: &Path) -> CiftiResult<(Self, Vec<Extension>)> {
        let mut file = File::open(path).map_err(CiftiError::file_io(path))?;
        let (header, extensions) = NiftiHeader::read(&mut file, path)?;
        let element_size = header.element_size().ok_or_else(|| CiftiError::BadHeader {
            path: path.to_owned(),
            reason: format!("不支持的 datatype {}", header.datatype),
        })?;
        let scaling = header.scaling();
        let mut this = Self {
            file,
            path: path.to_owned(),
            header,
            element_size,
            row_len: 0,
            rows: 0,
            scaling,
        };
        let dims: Vec<usize> = this.header.dims.iter().map(|&d| d.max(0) as usize).collect();
        this.set_shape(matrix_dims(&dims));
        Ok((this, extensions))
    }

    /// 创建 (或截断) 文件, 写出 header 与扩展, 数据区以 0 填充.
    pub fn create(
        path: &Path,
        mut header: NiftiHeader,
        extensions: &[Extension],
    ) -> CiftiResult<Self> {
        let bytes = header.encode(extensions);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(CiftiError::file_io(path))?;
        file.write_all(&bytes).map_err(CiftiError::file_io(path))?;

        let dims: Vec<usize> = header.dims.iter().map(|&d| d as usize).collect();
        let elements: u64 = dims.iter().map(|&d| d as u64).product();
        file.set_len(header.vox_offset + elements * 4)
            .map_err(CiftiError::file_io(path))?;

        let mut this = Self {
            file,
            path: path.to_owned(),
            header,
            element_size: 4,
            row_len: 0,
            rows: 0,
            scaling: None,
        };
        this.set_shape(matrix_dims(&dims));
        Ok(this)
    }

    /// 按逻辑维度设置行的划分: 行长度为 `dims[0]`, 行数为其余维度之积.
    pub fn set_shape(&mut self, dims: &[usize]) {
        self.row_len = dims.first().copied().unwrap_or(0);
        self.rows = dims.iter().skip(1).product();
    }

    /// 文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// header.
    #[inline]
    pub fn header(&self) -> &NiftiHeader {
        &self.header
    }

    fn check_row(&self, row: usize, len: usize) -> CiftiResult<()> {
        if row >= self.rows {
            return Err(CiftiError::IndexOutOfRange {
                index: row,
                len: self.rows,
            });
        }
        if len != self.row_len {
            return Err(CiftiError::bad_length(len, format!("行长度应为 {}", self.row_len)));
        }
        Ok(())
    }

    fn offset_of(&self, row: usize, col: usize) -> u64 {
        let element = row as u64 * self.row_len as u64 + col as u64;
        self.header.vox_offset + element * self.element_size as u64
    }

    /// 读取第 `row` 行.
    pub fn read_row(&mut self, row: usize, out: &mut [f32]) -> CiftiResult<()> {
        self.check_row(row, out.len())?;
        self.read_at(self.offset_of(row, 0), out)
    }

    /// 读取第 `row` 行第 `col` 个元素.
    pub fn read_element(&mut self, row: usize, col: usize) -> CiftiResult<f32> {
        let mut v = [0f32];
        self.read_at(self.offset_of(row, col), &mut v)?;
        Ok(v[0])
    }

    fn read_at(&mut self, offset: u64, out: &mut [f32]) -> CiftiResult<()> {
        let mut bytes = vec![0u8; out.len() * self.element_size];
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.read_exact(&mut bytes))
            .map_err(CiftiError::file_io(&self.path))?;

        match (self.header.datatype, self.header.endian) {
            (NIFTI_TYPE_FLOAT32, Endian::Little) => LittleEndian::read_f32_into(&bytes, out),
            (NIFTI_TYPE_FLOAT32, Endian::Big) => BigEndian::read_f32_into(&bytes, out),
            (_, endian) => {
                for (dst, src) in out.iter_mut().zip(bytes.chunks_exact(8)) {
                    *dst = match endian {
                        Endian::Little => LittleEndian::read_f64(src),
                        Endian::Big => BigEndian::read_f64(src),
                    } as f32;
                }
            }
        }
        if let Some((slope, inter)) = self.scaling {
            for v in out.iter_mut() {
                *v = (f64::from(*v) * slope + inter) as f32;
            }
        }
        Ok(())
    }

    /// 写入第 `row` 行. 只能用于本模块创建的文件.
    pub fn write_row(&mut self, row: usize, data: &[f32]) -> CiftiResult<()> {
        self.check_row(row, data.len())?;
        self.write_at(self.offset_of(row, 0), data)
    }

    /// 写入第 `row` 行第 `col` 个元素.
    pub fn write_element(&mut self, row: usize, col: usize, value: f32) -> CiftiResult<()> {
        self.write_at(self.offset_of(row, col), &[value])
    }

    fn write_at(&mut self, offset: u64, data: &[f32]) -> CiftiResult<()> {
        debug_assert_eq!(self.element_size, 4);
        let mut bytes = vec![0u8; data.len() * 4];
        match self.header.endian {
            Endian::Little => LittleEndian::write_f32_into(data, &mut bytes),
            Endian::Big => BigEndian::write_f32_into(data, &mut bytes),
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&bytes))
            .map_err(CiftiError::file_io(&self.path))
    }

    /// 将缓冲写入磁盘.
    pub fn flush(&mut self) -> CiftiResult<()> {
        self.file.flush().map_err(CiftiError::file_io(&self.path))
    }
}
