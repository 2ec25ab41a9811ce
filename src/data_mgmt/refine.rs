use std::collections::BTreeMap;

use crate::device::{DataRecord, RtValue};
use crate::node_mgmt::config::FieldMapping;

/// Derive output columns from a device record
///
/// Unset fields are left out. When a mapping sets `scale` or `decimals`, numeric
/// values are divided by `scale` and rounded to `decimals` places; everything
/// else is copied as it is.
pub fn refine_record(record: &DataRecord, mappings: &[FieldMapping]) -> BTreeMap<String, RtValue> {
    mappings
        .iter()
        .filter_map(|mapping| {
            let value = record.read(&mapping.from)?;
            let scaled = mapping.scale.is_some() || mapping.decimals.is_some();
            let refined = match value {
                RtValue::None => return None,
                RtValue::Int(v) if scaled => scale_number(*v as f64, mapping),
                RtValue::Float(v) if scaled => scale_number(*v, mapping),
                other => other.clone(),
            };
            Some((mapping.to.clone(), refined))
        })
        .collect()
}

fn scale_number(value: f64, mapping: &FieldMapping) -> RtValue {
    let mut scaled = value / mapping.scale.unwrap_or(1.0);
    if let Some(decimals) = mapping.decimals {
        let factor = 10f64.powi(decimals as i32);
        scaled = (scaled * factor).round() / factor;
    }
    RtValue::Float(scaled)
}
