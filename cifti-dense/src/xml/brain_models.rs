//! brain models 索引映射的读写.
//!
//! 读取分两步: 先把全部 `<BrainModel>` 解析为临时条目并按 `IndexOffset` 排序,
//! 校验它们恰好构成从 0 开始的连续划分, 再按排序后的顺序依次添加到映射中.

use itertools::Itertools;

use super::tree::{parse_numbers, Element, XmlWriter};
use super::volume::{read_volume, write_volume};
use super::CiftiVersion;
use crate::brain_models::{BrainModel, BrainModelIndex};
use crate::consts::model_type;
use crate::error::{CiftiError, CiftiResult};
use crate::structure::Structure;

const BRAIN_MODEL: &str = "BrainModel";
const VOLUME: &str = "Volume";
const VOXEL_INDICES: &str = "VoxelIndicesIJK";

/// 与版本相关的元素名/属性名.
impl CiftiVersion {
    fn vertex_count_attr(self) -> &'static str {
        match self {
            Self::V1 => "SurfaceNumberOfNodes",
            Self::V2 => "SurfaceNumberOfVertices",
        }
    }

    fn vertex_indices_elem(self) -> &'static str {
        match self {
            Self::V1 => "NodeIndices",
            Self::V2 => "VertexIndices",
        }
    }
}

/// 解析后, 尚未添加到映射中的 brain model.
#[derive(Debug)]
struct PendingModel {
    offset: usize,
    count: usize,
    structure: Structure,
    body: PendingBody,
}

#[derive(Debug)]
enum PendingBody {
    Surface { vertex_count: i64, vertices: Vec<i64> },
    Voxels(Vec<i64>),
}

fn parse_count(elem: &Element, key: &str) -> CiftiResult<usize> {
    let value: i64 = elem.parse_attr(key)?;
    usize::try_from(value)
        .map_err(|_| CiftiError::parse(format!("<{BRAIN_MODEL}> 的 {key} 不能为负: {value}")))
}

fn parse_model(elem: &Element, version: CiftiVersion) -> CiftiResult<PendingModel> {
    let offset = parse_count(elem, "IndexOffset")?;
    let count = parse_count(elem, "IndexCount")?;
    let name = elem.required_attr("BrainStructure")?;
    let structure = Structure::from_cifti_name(name)
        .ok_or_else(|| CiftiError::UnknownStructure(name.to_owned()))?;

    let (expected, is_surface) = match elem.required_attr("ModelType")? {
        model_type::SURFACE => (version.vertex_indices_elem(), true),
        model_type::VOXELS => (VOXEL_INDICES, false),
        other => return Err(CiftiError::parse(format!("未知的 ModelType `{other}`"))),
    };
    elem.check_children(&[expected])?;
    let data = elem.unique_child(expected)?;

    let body = if is_surface {
        let vertex_count: i64 = elem.parse_attr(version.vertex_count_attr())?;
        let vertices = match data {
            Some(child) => parse_numbers(&child.text, expected)?,
            // CIFTI-1 允许省略 NodeIndices, 表示使用 0..IndexCount.
            None if version == CiftiVersion::V1 => (0..count as i64).collect(),
            None => {
                return Err(CiftiError::parse(format!(
                    "表面模型 {structure} 缺少 <{expected}>"
                )))
            }
        };
        if vertices.len() != count {
            return Err(CiftiError::bad_length(
                vertices.len(),
                format!("{structure} 的顶点个数应等于 IndexCount {count}"),
            ));
        }
        PendingBody::Surface {
            vertex_count,
            vertices,
        }
    } else {
        let child = data.ok_or_else(|| {
            CiftiError::parse(format!("体素模型 {structure} 缺少 <{VOXEL_INDICES}>"))
        })?;
        let ijk: Vec<i64> = parse_numbers(&child.text, VOXEL_INDICES)?;
        if ijk.len() % 3 != 0 || ijk.len() != count * 3 {
            return Err(CiftiError::bad_length(
                ijk.len(),
                format!("{structure} 的体素坐标个数应为 IndexCount {count} 的 3 倍"),
            ));
        }
        PendingBody::Voxels(ijk)
    };

    Ok(PendingModel {
        offset,
        count,
        structure,
        body,
    })
}

/// 排序并校验连续性, 然后依次添加.
fn replay(index: &mut BrainModelIndex, mut pending: Vec<PendingModel>) -> CiftiResult<()> {
    pending.sort_by_key(|m| m.offset);

    let mut expected = 0;
    for (model, m) in pending.iter().enumerate() {
        if m.offset < expected {
            return Err(CiftiError::Overlap {
                offset: m.offset,
                model,
            });
        }
        if m.offset > expected {
            return Err(CiftiError::Gap {
                offset: m.offset,
                model,
            });
        }
        expected += m.count;
    }

    for m in pending {
        match m.body {
            PendingBody::Surface {
                vertex_count,
                vertices,
            } => index.add_surface_model(vertex_count, m.structure, &vertices)?,
            PendingBody::Voxels(ijk) => index.add_volume_model(m.structure, &ijk)?,
        }
    }
    Ok(())
}

fn parse_models(map: &Element, version: CiftiVersion) -> CiftiResult<Vec<PendingModel>> {
    map.children_named(BRAIN_MODEL)
        .map(|e| parse_model(e, version))
        .collect()
}

/// 读取 CIFTI-1 brain models 映射.
///
/// CIFTI-1 的体积空间不在映射内部, 体素只校验非负, 由调用方随后通过
/// [`BrainModelIndex::set_volume_space`] 绑定空间并完成校验.
pub(crate) fn read_v1(index: &mut BrainModelIndex, map: &Element) -> CiftiResult<()> {
    index.clear();
    map.check_children(&[BRAIN_MODEL])?;
    let pending = parse_models(map, CiftiVersion::V1)?;
    replay(index, pending)
}

/// 读取 CIFTI-2 brain models 映射. 体积空间 (若存在) 在添加模型之前绑定.
pub(crate) fn read_v2(index: &mut BrainModelIndex, map: &Element) -> CiftiResult<()> {
    index.clear();
    map.check_children(&[BRAIN_MODEL, VOLUME])?;
    if let Some(volume) = map.unique_child(VOLUME)? {
        index.set_volume_space(read_volume(volume, CiftiVersion::V2)?)?;
    }
    let pending = parse_models(map, CiftiVersion::V2)?;
    replay(index, pending)
}

fn write_models(
    index: &BrainModelIndex,
    version: CiftiVersion,
    w: &mut XmlWriter,
) -> CiftiResult<()> {
    for model in index.models() {
        let offset = model.start().to_string();
        let count = model.len().to_string();
        let structure = model.structure().cifti_name();
        match model {
            BrainModel::Surface(m) => {
                let vertex_count = m.vertex_count().to_string();
                let attrs = [
                    ("IndexOffset", offset.as_str()),
                    ("IndexCount", count.as_str()),
                    ("ModelType", model_type::SURFACE),
                    ("BrainStructure", structure),
                    (version.vertex_count_attr(), vertex_count.as_str()),
                ];
                w.start(BRAIN_MODEL, &attrs)?;
                let text = m.vertices().iter().join(" ");
                w.text_element(version.vertex_indices_elem(), &[], &text)?;
            }
            BrainModel::Voxels(m) => {
                let attrs = [
                    ("IndexOffset", offset.as_str()),
                    ("IndexCount", count.as_str()),
                    ("ModelType", model_type::VOXELS),
                    ("BrainStructure", structure),
                ];
                w.start(BRAIN_MODEL, &attrs)?;
                let text = m
                    .voxels()
                    .iter()
                    .map(|[i, j, k]| format!("{i} {j} {k}"))
                    .join("\n");
                w.text_element(VOXEL_INDICES, &[], &text)?;
            }
        }
        w.end(BRAIN_MODEL)?;
    }
    Ok(())
}

/// 写出 CIFTI-1 brain models 映射的子元素. 体积空间由文档层写出.
pub(crate) fn write_v1(index: &BrainModelIndex, w: &mut XmlWriter) -> CiftiResult<()> {
    write_models(index, CiftiVersion::V1, w)
}

/// 写出 CIFTI-2 brain models 映射的子元素.
///
/// 存在体素模型时先写出 `<Volume>`; 此时映射必须绑定了体积空间.
pub(crate) fn write_v2(index: &BrainModelIndex, w: &mut XmlWriter) -> CiftiResult<()> {
    if index.has_volume_data_any() {
        let space = index.volume_space().ok_or(CiftiError::MissingVolumeSpace)?;
        write_volume(space, CiftiVersion::V2, w)?;
    }
    write_models(index, CiftiVersion::V2, w)
}
