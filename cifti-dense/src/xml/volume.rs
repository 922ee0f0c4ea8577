//! `<Volume>` 元素的读写.

use super::tree::{parse_comma_list, parse_numbers, Element, XmlWriter};
use super::CiftiVersion;
use crate::error::{CiftiError, CiftiResult};
use crate::volume::VolumeSpace;

const VOLUME: &str = "Volume";
const TRANSFORM: &str = "TransformationMatrixVoxelIndicesIJKtoXYZ";

/// 读取 `<Volume>` 元素. 仿射矩阵统一换算为毫米.
pub(crate) fn read_volume(elem: &Element, version: CiftiVersion) -> CiftiResult<VolumeSpace> {
    elem.check_children(&[TRANSFORM])?;
    let dims: Vec<i64> =
        parse_comma_list(elem.required_attr("VolumeDimensions")?, "VolumeDimensions")?;
    let dims: [i64; 3] = dims
        .try_into()
        .map_err(|_| CiftiError::parse("VolumeDimensions 必须包含 3 个整数"))?;

    let transform = elem
        .unique_child(TRANSFORM)?
        .ok_or_else(|| CiftiError::parse(format!("<{VOLUME}> 缺少 <{TRANSFORM}>")))?;
    let scale = match version {
        CiftiVersion::V1 => match transform.attr("UnitsXYZ").unwrap_or("NIFTI_UNITS_MM") {
            "NIFTI_UNITS_MM" => 1.0,
            "NIFTI_UNITS_METER" => 1000.0,
            "NIFTI_UNITS_MICRON" => 0.001,
            other => return Err(CiftiError::parse(format!("未知的 UnitsXYZ `{other}`"))),
        },
        CiftiVersion::V2 => {
            let exponent: i32 = transform.parse_attr("MeterExponent")?;
            exponent
                .checked_add(3)
                .map(|e| 10f32.powi(e))
                .filter(|s| s.is_normal())
                .ok_or_else(|| CiftiError::parse(format!("MeterExponent {exponent} 超出范围")))?
        }
    };

    let values: Vec<f32> = parse_numbers(&transform.text, TRANSFORM)?;
    if values.len() != 16 {
        return Err(CiftiError::parse(format!(
            "{TRANSFORM} 必须包含 16 个数, 实际为 {}",
            values.len()
        )));
    }
    let mut sform = [[0f32; 4]; 3];
    for (row, chunk) in sform.iter_mut().zip(values.chunks_exact(4)) {
        for (dst, &v) in row.iter_mut().zip(chunk) {
            *dst = v * scale;
        }
    }

    VolumeSpace::new(dims, sform)
        .ok_or_else(|| CiftiError::parse(format!("VolumeDimensions {dims:?} 非法")))
}

/// 写出 `<Volume>` 元素.
pub(crate) fn write_volume(
    space: &VolumeSpace,
    version: CiftiVersion,
    w: &mut XmlWriter,
) -> CiftiResult<()> {
    let dims = space
        .dims()
        .map(|d| d.to_string())
        .join(",");
    w.start(VOLUME, &[("VolumeDimensions", &dims)])?;

    let mut text = String::new();
    for row in space.sform().iter().chain(std::iter::once(&[0.0, 0.0, 0.0, 1.0])) {
        let row: Vec<String> = row.iter().map(|v| v.to_string()).collect();
        text.push_str(&row.join(" "));
        text.push('\n');
    }
    let attrs: &[(&str, &str)] = match version {
        CiftiVersion::V1 => &[
            ("DataSpace", "NIFTI_XFORM_UNKNOWN"),
            ("TransformedSpace", "NIFTI_XFORM_UNKNOWN"),
            ("UnitsXYZ", "NIFTI_UNITS_MM"),
        ],
        CiftiVersion::V2 => &[("MeterExponent", "-3")],
    };
    w.text_element(TRANSFORM, attrs, text.trim_end())?;
    w.end(VOLUME)
}
