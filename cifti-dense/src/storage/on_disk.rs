use std::path::Path;

use log::{debug, warn};

use super::{check_column, row_number, RowStorage};
use crate::consts::{CIFTI_RESERVED_DIMS, NIFTI_ECODE_CIFTI};
use crate::error::{CiftiError, CiftiResult};
use crate::nifti_io::{Endian, Extension, NiftiFile, NiftiHeader};
use crate::xml::{CiftiVersion, CiftiXml};

/// 磁盘后端: 以 NIfTI 文件为容器, CIFTI XML 存放在 header 扩展中.
///
/// 按行访问对应一段连续的文件区域; 按列访问需要逐元素定位, 速度较慢.
#[derive(Debug)]
pub struct OnDiskStorage {
    file: NiftiFile,
    dims: Vec<usize>,
    version: CiftiVersion,
    writable: bool,
}

impl OnDiskStorage {
    /// 以只读方式打开 CIFTI 文件, 同时返回解析出的 XML 文档.
    ///
    /// CIFTI-1 文件在 header 中交换了前两维, 这里会换回逻辑顺序;
    /// 长度尚未确定的序列维度由 header 补全.
    pub fn open(path: &Path) -> CiftiResult<(Self, CiftiXml)> {
        let (mut file, extensions) = NiftiFile::open(path)?;
        let ext = extensions
            .iter()
            .find(|e| e.code == NIFTI_ECODE_CIFTI)
            .ok_or_else(|| CiftiError::NoExtension(path.to_owned()))?;
        let mut xml = CiftiXml::from_bytes(&ext.data)?;
        let version = xml.parsed_version().unwrap_or_default();

        let mismatch = |reason: String| CiftiError::DimensionMismatch {
            path: path.to_owned(),
            reason,
        };
        let header_dims = &file.header().dims;
        if header_dims.len() <= CIFTI_RESERVED_DIMS
            || header_dims[..CIFTI_RESERVED_DIMS].iter().any(|&d| d != 1)
        {
            return Err(mismatch(format!(
                "header 维度 {header_dims:?} 的前 {CIFTI_RESERVED_DIMS} 维必须为 1"
            )));
        }
        let mut dims = header_dims[CIFTI_RESERVED_DIMS..]
            .iter()
            .map(|&d| usize::try_from(d).map_err(|_| mismatch(format!("header 维度 {d} 为负"))))
            .collect::<CiftiResult<Vec<_>>>()?;
        if dims.len() != xml.number_of_dims() {
            return Err(mismatch(format!(
                "header 有 {} 个 CIFTI 维度, XML 有 {} 个",
                dims.len(),
                xml.number_of_dims()
            )));
        }
        if version.has_reversed_first_dims() && dims.len() >= 2 {
            warn!("{path:?}: CIFTI-1 文件, 交换 header 中的前两维");
            dims.swap(0, 1);
        }
        for dim in xml.unresolved_dims() {
            warn!("{path:?}: 第 {dim} 维长度未在 XML 中给出, 使用 header 中的 {}", dims[dim]);
            xml.resolve_length(dim, dims[dim]);
        }
        let expected = xml.dims()?;
        if expected != dims {
            return Err(mismatch(format!("header 维度 {dims:?}, XML 维度 {expected:?}")));
        }

        file.set_shape(&dims);
        debug!("打开磁盘后端 {path:?} (CIFTI-{}, 维度 {dims:?})", version.as_str());
        Ok((
            Self {
                file,
                dims,
                version,
                writable: false,
            },
            xml,
        ))
    }

    /// 以 `version` 创建新的 CIFTI 文件 (已存在时截断), 数据区以 0 填充.
    pub fn create(
        path: &Path,
        xml: &CiftiXml,
        version: CiftiVersion,
        endian: Endian,
    ) -> CiftiResult<Self> {
        let dims = xml.dims()?;
        let mut disk_dims = dims.clone();
        if version.has_reversed_first_dims() && disk_dims.len() >= 2 {
            disk_dims.swap(0, 1);
        }
        let (intent_code, intent_name) = xml.intent_info(version);
        let header = NiftiHeader::for_cifti(&disk_dims, intent_code, intent_name, endian);
        let extension = Extension {
            code: NIFTI_ECODE_CIFTI,
            data: xml.to_bytes(version)?,
        };

        let mut file = NiftiFile::create(path, header, &[extension])?;
        file.set_shape(&dims);
        debug!("创建磁盘后端 {path:?} (CIFTI-{}, 维度 {dims:?})", version.as_str());
        Ok(Self {
            file,
            dims,
            version,
            writable: true,
        })
    }

    /// 文件路径.
    #[inline]
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// 文件的 CIFTI 版本.
    #[inline]
    pub fn version(&self) -> CiftiVersion {
        self.version
    }

    /// 是否可写. 只有本后端创建的文件可写.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// 文件的字节序.
    #[inline]
    pub fn endian(&self) -> Endian {
        self.file.header().endian
    }

    /// 将写入的数据刷新到磁盘.
    pub fn flush(&mut self) -> CiftiResult<()> {
        self.file.flush()
    }

    fn check_writable(&self) -> CiftiResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(CiftiError::ReadOnly)
        }
    }
}

impl RowStorage for OnDiskStorage {
    fn dims(&self) -> &[usize] {
        &self.dims
    }

    fn get_row(&mut self, index_select: &[usize], out: &mut [f32]) -> CiftiResult<()> {
        let row = row_number(&self.dims, index_select, out.len())?;
        self.file.read_row(row, out)
    }

    fn get_column(&mut self, index: usize, out: &mut [f32]) -> CiftiResult<()> {
        check_column(&self.dims, index, out.len())?;
        debug!("{:?}: 按列读取磁盘文件, 需要 {} 次定位", self.path(), out.len());
        for (row, v) in out.iter_mut().enumerate() {
            *v = self.file.read_element(row, index)?;
        }
        Ok(())
    }

    fn set_row(&mut self, index_select: &[usize], data: &[f32]) -> CiftiResult<()> {
        self.check_writable()?;
        let row = row_number(&self.dims, index_select, data.len())?;
        self.file.write_row(row, data)
    }

    fn set_column(&mut self, index: usize, data: &[f32]) -> CiftiResult<()> {
        self.check_writable()?;
        check_column(&self.dims, index, data.len())?;
        debug!("{:?}: 按列写入磁盘文件, 需要 {} 次定位", self.path(), data.len());
        for (row, &v) in data.iter().enumerate() {
            self.file.write_element(row, index, v)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use byteorder::{BigEndian, ByteOrder, LittleEndian};

    use super::OnDiskStorage;
    use crate::brain_models::BrainModelIndex;
    use crate::error::CiftiError;
    use crate::nifti_io::Endian;
    use crate::storage::RowStorage;
    use crate::structure::Structure::*;
    use crate::xml::{CiftiVersion, CiftiXml, IndexMap, SeriesMap, SeriesUnit};

    fn dtseries() -> CiftiXml {
        let mut index = BrainModelIndex::new();
        index.add_surface_model(6, CortexLeft, &[0, 1, 4]).unwrap();
        CiftiXml::from_maps(vec![
            IndexMap::Series(SeriesMap::new(4, 0.0, 1.0, SeriesUnit::Second)),
            IndexMap::BrainModels(index),
        ])
    }

    #[test]
    fn test_create_then_open_both_versions() {
        for (version, endian) in [
            (CiftiVersion::V2, Endian::Little),
            (CiftiVersion::V2, Endian::Big),
            (CiftiVersion::V1, Endian::native()),
        ] {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("a.dtseries.nii");
            let xml = dtseries();

            let mut disk = OnDiskStorage::create(&path, &xml, version, endian).unwrap();
            assert_eq!(disk.dims(), &[4, 3]);
            disk.set_row(&[2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
            disk.set_column(0, &[9.0, 8.0, 7.0]).unwrap();
            drop(disk);

            let (mut disk, back) = OnDiskStorage::open(&path).unwrap();
            assert_eq!(back, xml);
            assert_eq!(disk.version(), version);
            assert_eq!(disk.endian(), endian);
            assert!(!disk.is_writable());
            assert_eq!(disk.dims(), &[4, 3]);

            let mut row = [0f32; 4];
            disk.get_row(&[2], &mut row).unwrap();
            assert_eq!(row, [7.0, 2.0, 3.0, 4.0]);
            let mut col = [0f32; 3];
            disk.get_column(0, &mut col).unwrap();
            assert_eq!(col, [9.0, 8.0, 7.0]);

            assert!(matches!(disk.set_row(&[0], &row), Err(CiftiError::ReadOnly)));
        }
    }

    /// 手工写出单文件 NIfTI-1: 348 字节 header, 一个 CIFTI 扩展, 然后是按行存储的数据.
    fn write_nifti1<B: ByteOrder>(path: &Path, disk_dims: [i16; 2], xml: &[u8], data: &[f32]) {
        let ext_size = (8 + xml.len()).div_ceil(16) * 16;
        let vox_offset = 348 + 4 + ext_size;
        let mut buf = vec![0u8; vox_offset + data.len() * 4];

        B::write_i32(&mut buf[0..4], 348);
        let dim = [6, 1, 1, 1, 1, disk_dims[0], disk_dims[1], 1];
        for (i, &d) in dim.iter().enumerate() {
            B::write_i16(&mut buf[40 + 2 * i..42 + 2 * i], d);
        }
        B::write_i16(&mut buf[68..70], 3002);
        B::write_i16(&mut buf[70..72], crate::consts::NIFTI_TYPE_FLOAT32);
        B::write_i16(&mut buf[72..74], 32);
        for i in 0..8 {
            B::write_f32(&mut buf[76 + 4 * i..80 + 4 * i], 1.0);
        }
        B::write_f32(&mut buf[108..112], vox_offset as f32);
        B::write_f32(&mut buf[112..116], 1.0);
        buf[328..328 + 14].copy_from_slice(b"ConnDenseTime\0");
        buf[344..348].copy_from_slice(b"n+1\0");

        buf[348] = 1;
        B::write_i32(&mut buf[352..356], ext_size as i32);
        B::write_i32(&mut buf[356..360], crate::consts::NIFTI_ECODE_CIFTI);
        buf[360..360 + xml.len()].copy_from_slice(xml);
        B::write_f32_into(data, &mut buf[vox_offset..]);

        std::fs::write(path, buf).unwrap();
    }

    fn check_nifti1<B: ByteOrder>(endian: Endian) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.dtseries.nii");
        let xml = dtseries();
        // 逻辑上 3 行, 每行 4 个时间点; CIFTI-1 header 中前两维互换.
        let data: Vec<f32> = (0..12).map(|v| v as f32).collect();
        write_nifti1::<B>(&path, [3, 4], &xml.to_bytes(CiftiVersion::V1).unwrap(), &data);

        let (mut disk, back) = OnDiskStorage::open(&path).unwrap();
        assert_eq!(disk.version(), CiftiVersion::V1);
        assert_eq!(disk.endian(), endian);
        assert_eq!(disk.dims(), &[4, 3]);
        assert_eq!(back, xml);

        let mut row = [0f32; 4];
        disk.get_row(&[1], &mut row).unwrap();
        assert_eq!(row, [4.0, 5.0, 6.0, 7.0]);
        let mut col = [0f32; 3];
        disk.get_column(2, &mut col).unwrap();
        assert_eq!(col, [2.0, 6.0, 10.0]);
    }

    #[test]
    fn test_open_nifti1() {
        check_nifti1::<LittleEndian>(Endian::Little);
        check_nifti1::<BigEndian>(Endian::Big);
    }

    #[test]
    fn test_missing_extension() {
        use crate::nifti_io::{NiftiFile, NiftiHeader};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.nii");
        let header = NiftiHeader::for_cifti(&[2, 2], 3000, "ConnUnknown", Endian::native());
        NiftiFile::create(&path, header, &[]).unwrap();
        assert!(matches!(OnDiskStorage::open(&path), Err(CiftiError::NoExtension(_))));
    }

    #[test]
    fn test_dimension_mismatch() {
        use crate::consts::NIFTI_ECODE_CIFTI;
        use crate::nifti_io::{Extension, NiftiFile, NiftiHeader};

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.nii");
        let xml = dtseries();
        let ext = Extension {
            code: NIFTI_ECODE_CIFTI,
            data: xml.to_bytes(CiftiVersion::V2).unwrap(),
        };
        // XML 描述 4 x 3, header 写成 4 x 5.
        let header = NiftiHeader::for_cifti(&[4, 5], 3002, "ConnDenseSeries", Endian::native());
        NiftiFile::create(&path, header, &[ext]).unwrap();
        assert!(matches!(
            OnDiskStorage::open(&path),
            Err(CiftiError::DimensionMismatch { .. })
        ));
    }
}
