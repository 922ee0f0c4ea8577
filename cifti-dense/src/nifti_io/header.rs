//! NIfTI header 与扩展的编解码.
//!
//! 读取时支持 NIfTI-1 (由 `nifti` crate 解析) 和 NIfTI-2, 两种字节序均可;
//! 写出时总是 NIfTI-2.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};

use crate::consts::{CIFTI_RESERVED_DIMS, NIFTI_TYPE_FLOAT32};
use crate::error::{CiftiError, CiftiResult};

/// NIfTI-1 header 长度.
const NIFTI1_HEADER_SIZE: usize = 348;

/// NIfTI-2 header 长度.
const NIFTI2_HEADER_SIZE: usize = 540;

/// NIfTI-2 单文件格式的 magic.
const NIFTI2_MAGIC: &[u8; 8] = b"n+2\0\r\n\x1a\n";

/// header 之后的 4 字节扩展标志长度.
const EXTENDER_SIZE: usize = 4;

/// 字节序.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Endian {
    /// 小端.
    Little,

    /// 大端.
    Big,
}

impl Endian {
    /// 本机字节序.
    #[inline]
    pub fn native() -> Self {
        if cfg!(target_endian = "little") {
            Self::Little
        } else {
            Self::Big
        }
    }
}

/// NIfTI 格式版本.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum NiftiVersion {
    One,
    Two,
}

/// NIfTI header 扩展.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Extension {
    pub code: i32,
    pub data: Vec<u8>,
}

impl Extension {
    /// 写出时占用的字节数: 8 字节头 + 数据, 向上取整到 16 的倍数.
    fn padded_size(&self) -> usize {
        (8 + self.data.len()).div_ceil(16) * 16
    }
}

/// CIFTI 用到的 NIfTI header 字段.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct NiftiHeader {
    pub version: NiftiVersion,
    pub endian: Endian,
    /// `dim[1..=dim[0]]`.
    pub dims: Vec<i64>,
    pub datatype: i16,
    pub vox_offset: u64,
    pub scl_slope: f64,
    pub scl_inter: f64,
    pub intent_code: i32,
    pub intent_name: String,
}

fn bad_header(path: &Path, reason: impl Into<String>) -> CiftiError {
    CiftiError::BadHeader {
        path: path.to_owned(),
        reason: reason.into(),
    }
}

/// 以 NUL 结尾的定长字符串.
fn c_str(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn decode_v2<B: ByteOrder>(buf: &[u8], endian: Endian, path: &Path) -> CiftiResult<NiftiHeader> {
    if &buf[4..12] != NIFTI2_MAGIC {
        return Err(bad_header(path, "只支持单文件 (n+2) 格式的 NIfTI-2"));
    }
    let ndim = B::read_i64(&buf[16..24]);
    if !(1..=7).contains(&ndim) {
        return Err(bad_header(path, format!("dim[0] = {ndim} 非法")));
    }
    let dims = (1..=ndim as usize)
        .map(|i| B::read_i64(&buf[16 + 8 * i..24 + 8 * i]))
        .collect();
    let vox_offset = B::read_i64(&buf[168..176]);
    Ok(NiftiHeader {
        version: NiftiVersion::Two,
        endian,
        dims,
        datatype: B::read_i16(&buf[12..14]),
        vox_offset: u64::try_from(vox_offset)
            .map_err(|_| bad_header(path, format!("vox_offset = {vox_offset} 非法")))?,
        scl_slope: B::read_f64(&buf[176..184]),
        scl_inter: B::read_f64(&buf[184..192]),
        intent_code: B::read_i32(&buf[504..508]),
        intent_name: c_str(&buf[508..524]),
    })
}

fn decode_v1(file: &mut File, endian: Endian, path: &Path) -> CiftiResult<NiftiHeader> {
    file.seek(SeekFrom::Start(0)).map_err(CiftiError::file_io(path))?;
    let hdr = nifti::NiftiHeader::from_reader(&mut *file)?;
    if &hdr.magic != b"n+1\0" {
        return Err(bad_header(path, "只支持单文件 (n+1) 格式的 NIfTI-1"));
    }
    let ndim = usize::from(hdr.dim[0]);
    if !(1..=7).contains(&ndim) {
        return Err(bad_header(path, format!("dim[0] = {ndim} 非法")));
    }
    Ok(NiftiHeader {
        version: NiftiVersion::One,
        endian,
        dims: hdr.dim[1..=ndim].iter().map(|&d| i64::from(d)).collect(),
        datatype: hdr.datatype,
        vox_offset: hdr.vox_offset.max(0.0) as u64,
        scl_slope: f64::from(hdr.scl_slope),
        scl_inter: f64::from(hdr.scl_inter),
        intent_code: i32::from(hdr.intent_code),
        intent_name: c_str(&hdr.intent_name),
    })
}

impl NiftiHeader {
    /// 为 CIFTI 数据创建 NIfTI-2 header. `cifti_dims` 为写入文件的维度顺序.
    pub fn for_cifti(
        cifti_dims: &[usize],
        intent_code: i32,
        intent_name: &str,
        endian: Endian,
    ) -> Self {
        let dims = std::iter::repeat(1)
            .take(CIFTI_RESERVED_DIMS)
            .chain(cifti_dims.iter().map(|&d| d as i64))
            .collect();
        Self {
            version: NiftiVersion::Two,
            endian,
            dims,
            datatype: NIFTI_TYPE_FLOAT32,
            vox_offset: 0,
            scl_slope: 1.0,
            scl_inter: 0.0,
            intent_code,
            intent_name: intent_name.to_owned(),
        }
    }

    /// header 之后第一个扩展的位置.
    fn extension_start(&self) -> u64 {
        match self.version {
            NiftiVersion::One => NIFTI1_HEADER_SIZE as u64,
            NiftiVersion::Two => NIFTI2_HEADER_SIZE as u64,
        }
    }

    /// 从文件头读取 header 和全部扩展.
    pub fn read(file: &mut File, path: &Path) -> CiftiResult<(Self, Vec<Extension>)> {
        let mut buf = vec![0u8; NIFTI2_HEADER_SIZE];
        file.seek(SeekFrom::Start(0)).map_err(CiftiError::file_io(path))?;
        file.read_exact(&mut buf[..4]).map_err(CiftiError::file_io(path))?;

        let header = match (LittleEndian::read_i32(&buf[..4]), BigEndian::read_i32(&buf[..4])) {
            (540, _) | (_, 540) => {
                file.read_exact(&mut buf[4..]).map_err(CiftiError::file_io(path))?;
                if LittleEndian::read_i32(&buf[..4]) == 540 {
                    decode_v2::<LittleEndian>(&buf, Endian::Little, path)?
                } else {
                    decode_v2::<BigEndian>(&buf, Endian::Big, path)?
                }
            }
            (348, _) => decode_v1(file, Endian::Little, path)?,
            (_, 348) => decode_v1(file, Endian::Big, path)?,
            (size, _) => return Err(bad_header(path, format!("sizeof_hdr = {size} 非法"))),
        };

        let extensions = header.read_extensions(file, path)?;
        Ok((header, extensions))
    }

    fn read_extensions(&self, file: &mut File, path: &Path) -> CiftiResult<Vec<Extension>> {
        let start = self.extension_start();
        let mut extensions = Vec::new();
        if self.vox_offset < start + EXTENDER_SIZE as u64 {
            return Ok(extensions);
        }

        let mut extender = [0u8; EXTENDER_SIZE];
        file.seek(SeekFrom::Start(start)).map_err(CiftiError::file_io(path))?;
        file.read_exact(&mut extender).map_err(CiftiError::file_io(path))?;
        if extender[0] == 0 {
            return Ok(extensions);
        }

        let mut pos = start + EXTENDER_SIZE as u64;
        let mut head = [0u8; 8];
        while pos + 8 <= self.vox_offset {
            file.read_exact(&mut head).map_err(CiftiError::file_io(path))?;
            let (size, code) = match self.endian {
                Endian::Little => {
                    (LittleEndian::read_i32(&head[..4]), LittleEndian::read_i32(&head[4..]))
                }
                Endian::Big => (BigEndian::read_i32(&head[..4]), BigEndian::read_i32(&head[4..])),
            };
            let size = match u64::try_from(size) {
                Ok(s) if s >= 8 && pos + s <= self.vox_offset => s,
                _ => return Err(bad_header(path, format!("扩展长度 {size} 非法"))),
            };
            let mut data = vec![0u8; (size - 8) as usize];
            file.read_exact(&mut data).map_err(CiftiError::file_io(path))?;
            extensions.push(Extension { code, data });
            pos += size;
        }
        Ok(extensions)
    }

    /// 元素字节数. 只支持 FLOAT32 与 FLOAT64.
    pub fn element_size(&self) -> Option<usize> {
        match self.datatype {
            crate::consts::NIFTI_TYPE_FLOAT32 => Some(4),
            crate::consts::NIFTI_TYPE_FLOAT64 => Some(8),
            _ => None,
        }
    }

    /// 需要应用的线性缩放 `(slope, inter)`. 恒等缩放或 `slope == 0` 时返回 `None`.
    pub fn scaling(&self) -> Option<(f64, f64)> {
        let identity = self.scl_slope == 1.0 && self.scl_inter == 0.0;
        (self.scl_slope != 0.0 && self.scl_slope.is_finite() && !identity)
            .then_some((self.scl_slope, self.scl_inter))
    }

    /// 编码为 NIfTI-2 header + 扩展, 并据此设置 `vox_offset`.
    pub fn encode(&mut self, extensions: &[Extension]) -> Vec<u8> {
        let ext_size: usize = extensions.iter().map(Extension::padded_size).sum();
        self.version = NiftiVersion::Two;
        self.vox_offset = (NIFTI2_HEADER_SIZE + EXTENDER_SIZE + ext_size) as u64;

        match self.endian {
            Endian::Little => self.encode_with::<LittleEndian>(extensions),
            Endian::Big => self.encode_with::<BigEndian>(extensions),
        }
    }

    fn encode_with<B: ByteOrder>(&self, extensions: &[Extension]) -> Vec<u8> {
        let mut buf = vec![0u8; self.vox_offset as usize];
        B::write_i32(&mut buf[0..4], NIFTI2_HEADER_SIZE as i32);
        buf[4..12].copy_from_slice(NIFTI2_MAGIC);
        B::write_i16(&mut buf[12..14], self.datatype);
        let bitpix = self.element_size().map_or(0, |s| s * 8) as i16;
        B::write_i16(&mut buf[14..16], bitpix);

        B::write_i64(&mut buf[16..24], self.dims.len() as i64);
        for i in 1..8 {
            let d = self.dims.get(i - 1).copied().unwrap_or(1);
            B::write_i64(&mut buf[16 + 8 * i..24 + 8 * i], d);
        }
        for i in 0..8 {
            B::write_f64(&mut buf[104 + 8 * i..112 + 8 * i], 1.0);
        }
        B::write_i64(&mut buf[168..176], self.vox_offset as i64);
        B::write_f64(&mut buf[176..184], self.scl_slope);
        B::write_f64(&mut buf[184..192], self.scl_inter);
        B::write_i32(&mut buf[504..508], self.intent_code);
        let name = self.intent_name.as_bytes();
        let n = name.len().min(15);
        buf[508..508 + n].copy_from_slice(&name[..n]);

        let mut pos = NIFTI2_HEADER_SIZE;
        if !extensions.is_empty() {
            buf[pos] = 1;
        }
        pos += EXTENDER_SIZE;
        for ext in extensions {
            let size = ext.padded_size();
            B::write_i32(&mut buf[pos..pos + 4], size as i32);
            B::write_i32(&mut buf[pos + 4..pos + 8], ext.code);
            buf[pos + 8..pos + 8 + ext.data.len()].copy_from_slice(&ext.data);
            pos += size;
        }
        buf
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::{Endian, Extension, NiftiHeader, NiftiVersion};

    fn roundtrip(endian: Endian) {
        let mut header = NiftiHeader::for_cifti(&[5, 10], 3001, "ConnDense", endian);
        let ext = vec![Extension {
            code: 32,
            data: b"<CIFTI/>".to_vec(),
        }];
        let bytes = header.encode(&ext);
        assert_eq!(header.vox_offset, 544 + 16);
        assert_eq!(bytes.len() as u64, header.vox_offset);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.nii");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(&bytes)
            .unwrap();
        let mut file = std::fs::File::open(&path).unwrap();
        let (back, extensions) = NiftiHeader::read(&mut file, &path).unwrap();

        assert_eq!(back, header);
        assert_eq!(back.version, NiftiVersion::Two);
        assert_eq!(back.dims, vec![1, 1, 1, 1, 5, 10]);
        assert_eq!(extensions.len(), 1);
        assert_eq!(extensions[0].code, 32);
        // 数据按 16 字节对齐补零.
        assert_eq!(&extensions[0].data[..8], b"<CIFTI/>");
        assert!(extensions[0].data[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_roundtrip_little() {
        roundtrip(Endian::Little);
    }

    #[test]
    fn test_roundtrip_big() {
        roundtrip(Endian::Big);
    }

    #[test]
    fn test_scaling() {
        let mut header = NiftiHeader::for_cifti(&[1], 3000, "ConnUnknown", Endian::native());
        assert_eq!(header.scaling(), None);
        header.scl_slope = 0.0;
        assert_eq!(header.scaling(), None);
        header.scl_slope = 2.0;
        header.scl_inter = 1.0;
        assert_eq!(header.scaling(), Some((2.0, 1.0)));
        assert_eq!(header.element_size(), Some(4));
    }

    #[test]
    fn test_bad_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.nii");
        std::fs::write(&path, [0u8; 600]).unwrap();
        let mut file = std::fs::File::open(&path).unwrap();
        assert!(NiftiHeader::read(&mut file, &path).is_err());

        std::fs::write(&path, [1u8; 2]).unwrap();
        let mut file = std::fs::File::open(&path).unwrap();
        assert!(NiftiHeader::read(&mut file, &path).is_err());
    }
}
