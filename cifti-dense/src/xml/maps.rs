//! 序列映射, 标量映射和元数据.

use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

use super::tree::{Element, XmlWriter};
use super::CiftiVersion;
use crate::error::{CiftiError, CiftiResult};

/// 元数据: 有序的 名字 -> 值 表.
pub type MetaData = BTreeMap<String, String>;

/// 序列的单位.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SeriesUnit {
    /// 秒.
    #[default]
    Second,
    /// 赫兹.
    Hertz,
    /// 米.
    Meter,
    /// 弧度.
    Radian,
}

impl SeriesUnit {
    fn as_str(self) -> &'static str {
        match self {
            Self::Second => "SECOND",
            Self::Hertz => "HERTZ",
            Self::Meter => "METER",
            Self::Radian => "RADIAN",
        }
    }

    fn parse(s: &str) -> CiftiResult<Self> {
        Ok(match s {
            "SECOND" => Self::Second,
            "HERTZ" => Self::Hertz,
            "METER" => Self::Meter,
            "RADIAN" => Self::Radian,
            _ => return Err(CiftiError::parse(format!("未知的 SeriesUnit `{s}`"))),
        })
    }
}

impl Display for SeriesUnit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 等间隔序列映射 (dtseries 的时间维等).
#[derive(Clone, Debug, PartialEq)]
pub struct SeriesMap {
    /// 序列长度. CIFTI-1 的时间点映射不记录长度, 由容器的 header 补全.
    pub length: Option<usize>,
    /// 第一个点的值.
    pub start: f64,
    /// 相邻两点的间隔.
    pub step: f64,
    /// 单位.
    pub unit: SeriesUnit,
}

impl SeriesMap {
    /// 创建长度已知的序列映射.
    pub fn new(length: usize, start: f64, step: f64, unit: SeriesUnit) -> Self {
        Self {
            length: Some(length),
            start,
            step,
            unit,
        }
    }

    pub(crate) fn read(elem: &Element, version: CiftiVersion) -> CiftiResult<Self> {
        elem.check_children(&[])?;
        match version {
            CiftiVersion::V2 => {
                let exponent: i32 = elem.parse_attr("SeriesExponent")?;
                let scale = 10f64.powi(exponent);
                let length: i64 = elem.parse_attr("NumberOfSeriesPoints")?;
                let length = usize::try_from(length)
                    .map_err(|_| {
                        CiftiError::parse(format!("NumberOfSeriesPoints 非法: {length}"))
                    })?;
                Ok(Self {
                    length: Some(length),
                    start: elem.parse_attr::<f64>("SeriesStart")? * scale,
                    step: elem.parse_attr::<f64>("SeriesStep")? * scale,
                    unit: SeriesUnit::parse(elem.required_attr("SeriesUnit")?)?,
                })
            }
            CiftiVersion::V1 => {
                let scale = match elem.required_attr("TimeStepUnits")? {
                    "NIFTI_UNITS_SEC" => 1.0,
                    "NIFTI_UNITS_MSEC" => 1e-3,
                    "NIFTI_UNITS_USEC" => 1e-6,
                    other => {
                        return Err(CiftiError::parse(format!("未知的 TimeStepUnits `{other}`")))
                    }
                };
                Ok(Self {
                    length: None,
                    start: elem.parse_attr_opt::<f64>("TimeStart")?.unwrap_or(0.0) * scale,
                    step: elem.parse_attr::<f64>("TimeStep")? * scale,
                    unit: SeriesUnit::Second,
                })
            }
        }
    }

    /// 写出映射的属性. CIFTI-1 只能表示以秒为单位的时间序列.
    pub(crate) fn attributes(
        &self,
        version: CiftiVersion,
        dim: usize,
    ) -> CiftiResult<Vec<(&'static str, String)>> {
        let start = self.start.to_string();
        let step = self.step.to_string();
        Ok(match version {
            CiftiVersion::V2 => {
                let length = self.length.ok_or(CiftiError::UnresolvedLength(dim))?;
                vec![
                    ("NumberOfSeriesPoints", length.to_string()),
                    ("SeriesExponent", "0".to_owned()),
                    ("SeriesStart", start),
                    ("SeriesStep", step),
                    ("SeriesUnit", self.unit.to_string()),
                ]
            }
            CiftiVersion::V1 => {
                if self.unit != SeriesUnit::Second {
                    return Err(CiftiError::parse(format!(
                        "CIFTI-1 不支持单位为 {} 的序列",
                        self.unit
                    )));
                }
                vec![
                    ("TimeStep", step),
                    ("TimeStart", start),
                    ("TimeStepUnits", "NIFTI_UNITS_SEC".to_owned()),
                ]
            }
        })
    }
}

/// 标量映射中的一项.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct NamedMap {
    /// 名字.
    pub name: String,
    /// 该项的元数据.
    pub metadata: MetaData,
}

/// 标量映射 (dscalar 的标量维).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScalarsMap {
    /// 各项, 按索引顺序排列.
    pub maps: Vec<NamedMap>,
}

impl ScalarsMap {
    /// 由名字列表创建标量映射.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            maps: names
                .into_iter()
                .map(|name| NamedMap {
                    name: name.into(),
                    metadata: MetaData::new(),
                })
                .collect(),
        }
    }

    /// 项数.
    #[inline]
    pub fn len(&self) -> usize {
        self.maps.len()
    }

    /// 是否没有任何项.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub(crate) fn read(elem: &Element) -> CiftiResult<Self> {
        elem.check_children(&["NamedMap"])?;
        let maps = elem
            .children_named("NamedMap")
            .map(|e| {
                e.check_children(&["MapName", "MetaData"])?;
                let name = e
                    .unique_child("MapName")?
                    .ok_or_else(|| CiftiError::parse("<NamedMap> 缺少 <MapName>"))?
                    .text
                    .clone();
                let metadata = match e.unique_child("MetaData")? {
                    Some(md) => read_metadata(md)?,
                    None => MetaData::new(),
                };
                Ok(NamedMap { name, metadata })
            })
            .collect::<CiftiResult<_>>()?;
        Ok(Self { maps })
    }

    pub(crate) fn write(&self, w: &mut XmlWriter) -> CiftiResult<()> {
        for map in &self.maps {
            w.start("NamedMap", &[])?;
            write_metadata(&map.metadata, w)?;
            w.text_element("MapName", &[], &map.name)?;
            w.end("NamedMap")?;
        }
        Ok(())
    }
}

/// 读取 `<MetaData>` 元素.
pub(crate) fn read_metadata(elem: &Element) -> CiftiResult<MetaData> {
    elem.check_children(&["MD"])?;
    let mut metadata = MetaData::new();
    for md in elem.children_named("MD") {
        md.check_children(&["Name", "Value"])?;
        let name = md
            .unique_child("Name")?
            .ok_or_else(|| CiftiError::parse("<MD> 缺少 <Name>"))?;
        let value = md.unique_child("Value")?.map(|v| v.text.clone());
        metadata.insert(name.text.clone(), value.unwrap_or_default());
    }
    Ok(metadata)
}

/// 写出 `<MetaData>` 元素. 元数据为空时不写出.
pub(crate) fn write_metadata(metadata: &MetaData, w: &mut XmlWriter) -> CiftiResult<()> {
    if metadata.is_empty() {
        return Ok(());
    }
    w.start("MetaData", &[])?;
    for (name, value) in metadata {
        w.start("MD", &[])?;
        w.text_element("Name", &[], name)?;
        w.text_element("Value", &[], value)?;
        w.end("MD")?;
    }
    w.end("MetaData")
}
