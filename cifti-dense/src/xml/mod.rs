//! CIFTI XML 文档.
//!
//! 一个文档包含若干文件级元数据, 以及每一维一个索引映射. 第 0 维的映射描述
//! 行内 (连续存储) 的方向, 第 1 维描述行之间的方向, 以此类推.
//!
//! CIFTI-1 与 CIFTI-2 的主要差别:
//!
//! | | CIFTI-1 | CIFTI-2 |
//! |---|---|---|
//! | 前两维编号 | 互换 | 正常 |
//! | 体积空间 | `Matrix` 下的 `Volume` | brain models 映射内的 `Volume` |
//! | 表面顶点 | `NodeIndices` (可省略) | `VertexIndices` |
//! | 序列 | `TIME_POINTS`, 长度由 header 决定 | `SERIES`, 显式长度 |

use crate::brain_models::BrainModelIndex;
use crate::consts::{index_type, intent};
use crate::error::{CiftiError, CiftiResult};
use tree::{parse_comma_list, parse_document, Element, XmlWriter};

mod brain_models;
mod maps;
mod tree;
mod volume;

pub use maps::{MetaData, NamedMap, ScalarsMap, SeriesMap, SeriesUnit};

const MATRIX: &str = "Matrix";
const MATRIX_INDICES_MAP: &str = "MatrixIndicesMap";
const META_DATA: &str = "MetaData";
const VOLUME: &str = "Volume";

/// CIFTI 版本.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum CiftiVersion {
    /// CIFTI-1 (`Version="1.0"`).
    V1,

    /// CIFTI-2 (`Version="2"`).
    #[default]
    V2,
}

impl CiftiVersion {
    /// 该版本是否将前两维的编号互换 (XML 中的维度编号与 NIfTI header 中的维度顺序).
    #[inline]
    pub fn has_reversed_first_dims(self) -> bool {
        matches!(self, Self::V1)
    }

    /// 写入 XML `Version` 属性的字符串.
    #[inline]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::V1 => "1.0",
            Self::V2 => "2",
        }
    }

    /// 解析 XML `Version` 属性.
    pub fn from_attr(s: &str) -> Option<Self> {
        match s.trim() {
            "1" | "1.0" => Some(Self::V1),
            "2" | "2.0" => Some(Self::V2),
            _ => None,
        }
    }

    /// 在 XML 维度编号与内部维度编号之间转换. 变换是对合的.
    #[inline]
    fn swap_dim(self, dim: usize) -> usize {
        match (self.has_reversed_first_dims(), dim) {
            (true, 0) => 1,
            (true, 1) => 0,
            _ => dim,
        }
    }
}

/// 单个维度的索引映射.
#[derive(Clone, Debug, PartialEq)]
pub enum IndexMap {
    /// brainordinate 映射.
    BrainModels(BrainModelIndex),

    /// 等间隔序列.
    Series(SeriesMap),

    /// 命名标量.
    Scalars(ScalarsMap),
}

impl IndexMap {
    /// 该维的长度. 长度尚未确定的序列返回 `None`.
    pub fn len(&self) -> Option<usize> {
        match self {
            Self::BrainModels(index) => Some(index.len()),
            Self::Series(series) => series.length,
            Self::Scalars(scalars) => Some(scalars.len()),
        }
    }

    /// 获取 brainordinate 映射.
    #[inline]
    pub fn as_brain_models(&self) -> Option<&BrainModelIndex> {
        match self {
            Self::BrainModels(index) => Some(index),
            _ => None,
        }
    }

    fn type_name(&self, version: CiftiVersion) -> &'static str {
        match (self, version) {
            (Self::BrainModels(_), _) => index_type::BRAIN_MODELS,
            (Self::Series(_), CiftiVersion::V1) => index_type::TIME_POINTS,
            (Self::Series(_), CiftiVersion::V2) => index_type::SERIES,
            (Self::Scalars(_), _) => index_type::SCALARS,
        }
    }

    fn read(elem: &Element, version: CiftiVersion) -> CiftiResult<Self> {
        let kind = elem.required_attr("IndicesMapToDataType")?;
        match (kind, version) {
            (index_type::BRAIN_MODELS, _) => {
                let mut index = BrainModelIndex::new();
                match version {
                    CiftiVersion::V1 => brain_models::read_v1(&mut index, elem)?,
                    CiftiVersion::V2 => brain_models::read_v2(&mut index, elem)?,
                }
                Ok(Self::BrainModels(index))
            }
            (index_type::TIME_POINTS, CiftiVersion::V1)
            | (index_type::SERIES, CiftiVersion::V2) => {
                SeriesMap::read(elem, version).map(Self::Series)
            }
            (index_type::SCALARS, _) => ScalarsMap::read(elem).map(Self::Scalars),
            _ => Err(CiftiError::parse(format!(
                "CIFTI-{} 不支持索引映射类型 `{kind}`",
                version.as_str()
            ))),
        }
    }

    fn write(
        &self,
        version: CiftiVersion,
        applies_to: &str,
        w: &mut XmlWriter,
        dim: usize,
    ) -> CiftiResult<()> {
        let mut attrs = vec![
            ("AppliesToMatrixDimension", applies_to.to_owned()),
            ("IndicesMapToDataType", self.type_name(version).to_owned()),
        ];
        match self {
            Self::BrainModels(index) => {
                w.start(MATRIX_INDICES_MAP, &borrow_attrs(&attrs))?;
                match version {
                    CiftiVersion::V1 => brain_models::write_v1(index, w)?,
                    CiftiVersion::V2 => brain_models::write_v2(index, w)?,
                }
                w.end(MATRIX_INDICES_MAP)
            }
            Self::Series(series) => {
                attrs.extend(series.attributes(version, dim)?);
                w.empty(MATRIX_INDICES_MAP, &borrow_attrs(&attrs))
            }
            Self::Scalars(scalars) => {
                w.start(MATRIX_INDICES_MAP, &borrow_attrs(&attrs))?;
                scalars.write(w)?;
                w.end(MATRIX_INDICES_MAP)
            }
        }
    }
}

fn borrow_attrs<'a>(attrs: &'a [(&'static str, String)]) -> Vec<(&'a str, &'a str)> {
    attrs.iter().map(|(k, v)| (*k, v.as_str())).collect()
}

/// CIFTI XML 文档.
#[derive(Clone, Debug, Default)]
pub struct CiftiXml {
    parsed_version: Option<CiftiVersion>,
    metadata: MetaData,
    maps: Vec<IndexMap>,
}

impl PartialEq for CiftiXml {
    /// 解析时的版本不参与比较.
    fn eq(&self, other: &Self) -> bool {
        self.metadata == other.metadata && self.maps == other.maps
    }
}

impl CiftiXml {
    /// 由各维的映射创建文档.
    pub fn from_maps(maps: Vec<IndexMap>) -> Self {
        Self {
            maps,
            ..Default::default()
        }
    }

    /// 二维 brainordinate × brainordinate 文档 (dconn).
    pub fn dense(rows: BrainModelIndex, columns: BrainModelIndex) -> Self {
        Self::from_maps(vec![IndexMap::BrainModels(rows), IndexMap::BrainModels(columns)])
    }

    /// 维度个数.
    #[inline]
    pub fn number_of_dims(&self) -> usize {
        self.maps.len()
    }

    /// 各维的映射.
    #[inline]
    pub fn maps(&self) -> &[IndexMap] {
        &self.maps
    }

    /// 获取第 `dim` 维的映射.
    #[inline]
    pub fn map(&self, dim: usize) -> Option<&IndexMap> {
        self.maps.get(dim)
    }

    /// 替换第 `dim` 维的映射. 越界时返回 `Err(CiftiError::IndexOutOfRange)`.
    pub fn set_map(&mut self, dim: usize, map: IndexMap) -> CiftiResult<()> {
        let len = self.maps.len();
        let slot = self
            .maps
            .get_mut(dim)
            .ok_or(CiftiError::IndexOutOfRange { index: dim, len })?;
        *slot = map;
        Ok(())
    }

    /// 获取第 `dim` 维的 brainordinate 映射.
    #[inline]
    pub fn brain_models(&self, dim: usize) -> Option<&BrainModelIndex> {
        self.map(dim).and_then(IndexMap::as_brain_models)
    }

    /// 文件级元数据.
    #[inline]
    pub fn metadata(&self) -> &MetaData {
        &self.metadata
    }

    /// 文件级元数据 (可变).
    #[inline]
    pub fn metadata_mut(&mut self) -> &mut MetaData {
        &mut self.metadata
    }

    /// 解析该文档时的版本. 手工构造的文档返回 `None`.
    #[inline]
    pub fn parsed_version(&self) -> Option<CiftiVersion> {
        self.parsed_version
    }

    /// 各维的长度.
    ///
    /// 有维度长度尚未确定时, 返回 `Err(CiftiError::UnresolvedLength)`.
    pub fn dims(&self) -> CiftiResult<Vec<usize>> {
        self.maps
            .iter()
            .enumerate()
            .map(|(dim, m)| m.len().ok_or(CiftiError::UnresolvedLength(dim)))
            .collect()
    }

    /// 长度尚未确定的维度.
    pub fn unresolved_dims(&self) -> Vec<usize> {
        self.maps
            .iter()
            .enumerate()
            .filter_map(|(dim, m)| m.len().is_none().then_some(dim))
            .collect()
    }

    /// 补全长度尚未确定的序列维度. 长度已知的维度不受影响.
    pub(crate) fn resolve_length(&mut self, dim: usize, length: usize) {
        if let Some(IndexMap::Series(series)) = self.maps.get_mut(dim) {
            if series.length.is_none() {
                series.length = Some(length);
            }
        }
    }

    /// 根据映射类型推断 NIfTI intent code 与 intent name.
    pub fn intent_info(&self, version: CiftiVersion) -> (i32, &'static str) {
        match self.maps.as_slice() {
            [IndexMap::BrainModels(_), IndexMap::BrainModels(_)] => {
                (intent::CONNECTIVITY_DENSE, intent::NAME_DENSE)
            }
            [IndexMap::Series(_), IndexMap::BrainModels(_)] => (
                intent::CONNECTIVITY_DENSE_SERIES,
                match version {
                    CiftiVersion::V1 => intent::NAME_DENSE_TIME,
                    CiftiVersion::V2 => intent::NAME_DENSE_SERIES,
                },
            ),
            [IndexMap::Scalars(_), IndexMap::BrainModels(_)] => {
                (intent::CONNECTIVITY_DENSE_SCALARS, intent::NAME_DENSE_SCALAR)
            }
            _ => (intent::CONNECTIVITY_UNKNOWN, intent::NAME_UNKNOWN),
        }
    }

    /// 解析 XML 文档. 末尾的 NUL 填充会被忽略.
    pub fn from_bytes(bytes: &[u8]) -> CiftiResult<Self> {
        let end = bytes.iter().rposition(|&b| b != 0).map_or(0, |p| p + 1);
        let root = parse_document(&bytes[..end])?;
        if root.name != "CIFTI" {
            return Err(CiftiError::parse(format!("根元素应为 <CIFTI>, 实际为 <{}>", root.name)));
        }
        let raw = root.required_attr("Version")?;
        let version = CiftiVersion::from_attr(raw)
            .ok_or_else(|| CiftiError::parse(format!("不支持的 CIFTI 版本 `{raw}`")))?;

        root.check_children(&[MATRIX])?;
        let matrix = root
            .unique_child(MATRIX)?
            .ok_or_else(|| CiftiError::parse("缺少 <Matrix>"))?;
        match version {
            CiftiVersion::V1 => matrix.check_children(&[META_DATA, MATRIX_INDICES_MAP, VOLUME])?,
            CiftiVersion::V2 => matrix.check_children(&[META_DATA, MATRIX_INDICES_MAP])?,
        }

        let metadata = match matrix.unique_child(META_DATA)? {
            Some(md) => maps::read_metadata(md)?,
            None => MetaData::new(),
        };

        let mut parsed = Vec::new();
        for elem in matrix.children_named(MATRIX_INDICES_MAP) {
            let applies: Vec<usize> = parse_comma_list(
                elem.required_attr("AppliesToMatrixDimension")?,
                "AppliesToMatrixDimension",
            )?;
            parsed.push((applies, IndexMap::read(elem, version)?));
        }

        // 每一维恰有一个映射, 因此维度编号必须小于声明的维度总数.
        let declared: usize = parsed.iter().map(|(applies, _)| applies.len()).sum();
        let mut slots: Vec<Option<IndexMap>> = vec![None; declared];
        for (applies, map) in parsed {
            for dim in applies.into_iter().map(|d| version.swap_dim(d)) {
                let slot = slots.get_mut(dim).ok_or_else(|| {
                    CiftiError::parse(format!(
                        "AppliesToMatrixDimension 中的维度 {} 超出声明的 {declared} 个维度",
                        version.swap_dim(dim)
                    ))
                })?;
                if slot.replace(map.clone()).is_some() {
                    return Err(CiftiError::parse(format!("第 {dim} 维存在多个索引映射")));
                }
            }
        }
        if slots.is_empty() {
            return Err(CiftiError::parse("没有任何索引映射"));
        }
        let mut maps = slots
            .into_iter()
            .enumerate()
            .map(|(dim, m)| m.ok_or_else(|| CiftiError::parse(format!("第 {dim} 维没有索引映射"))))
            .collect::<CiftiResult<Vec<_>>>()?;

        // CIFTI-1 的体积空间在所有映射解析完成后绑定, 此时才校验体素范围.
        if let Some(volume) = matrix.unique_child(VOLUME)? {
            let space = volume::read_volume(volume, version)?;
            for map in maps.iter_mut() {
                if let IndexMap::BrainModels(index) = map {
                    index.set_volume_space(space.clone())?;
                }
            }
        }

        Ok(Self {
            parsed_version: Some(version),
            metadata,
            maps,
        })
    }

    /// 以指定版本写出 XML 文档.
    ///
    /// 映射相同的多个维度写为同一个 `MatrixIndicesMap`.
    pub fn to_bytes(&self, version: CiftiVersion) -> CiftiResult<Vec<u8>> {
        if self.maps.is_empty() {
            return Err(CiftiError::EmptyMapping);
        }
        let mut w = XmlWriter::new()?;
        match version {
            CiftiVersion::V1 => w.start(
                "CIFTI",
                &[("Version", version.as_str()), ("NumberOfMatrices", "1")],
            )?,
            CiftiVersion::V2 => w.start("CIFTI", &[("Version", version.as_str())])?,
        }
        w.start(MATRIX, &[])?;
        maps::write_metadata(&self.metadata, &mut w)?;

        if version == CiftiVersion::V1 {
            let space = self
                .maps
                .iter()
                .filter_map(IndexMap::as_brain_models)
                .find_map(BrainModelIndex::volume_space);
            if let Some(space) = space {
                volume::write_volume(space, version, &mut w)?;
            }
        }

        let mut written = vec![false; self.maps.len()];
        for (dim, map) in self.maps.iter().enumerate() {
            if written[dim] {
                continue;
            }
            let mut applies = Vec::new();
            for (other, m) in self.maps.iter().enumerate().skip(dim) {
                if !written[other] && m == map {
                    written[other] = true;
                    applies.push(version.swap_dim(other));
                }
            }
            applies.sort_unstable();
            let applies = applies
                .iter()
                .map(usize::to_string)
                .collect::<Vec<_>>()
                .join(",");
            map.write(version, &applies, &mut w, dim)?;
        }

        w.end(MATRIX)?;
        w.end("CIFTI")?;
        Ok(w.finish())
    }
}
