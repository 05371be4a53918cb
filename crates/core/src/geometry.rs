//! Extraction payload types and the geometry normalizer.
//!
//! The extraction service is untrusted: dimension values may arrive as JSON
//! numbers or strings, units as arbitrary text. Normalization converts every
//! provided dimension into canonical metres and records what is missing or
//! invalid instead of failing.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::units::meter_factor;

/// A `{value, unit}` pair as returned by the extraction service.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawDimension {
    pub value: Value,
    pub unit: String,
}

impl RawDimension {
    /// Exact metre conversion, or `None` when the value is not numeric or
    /// the unit symbol is unrecognized.
    pub fn to_metres(&self) -> Option<Decimal> {
        let value = match &self.value {
            Value::Number(number) => number.to_string().parse::<Decimal>().ok()?,
            Value::String(text) => text.trim().parse::<Decimal>().ok()?,
            _ => return None,
        };
        Some(value * meter_factor(&self.unit)?)
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomRelation {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub relation: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRoom {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub length: Option<RawDimension>,
    #[serde(default)]
    pub width: Option<RawDimension>,
    #[serde(default)]
    pub height: Option<RawDimension>,
    #[serde(default)]
    pub wall_thickness: Option<RawDimension>,
    #[serde(default)]
    pub relations: Vec<RoomRelation>,
}

/// The fixed schema the extraction service is asked to produce.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedPayload {
    #[serde(default)]
    pub rooms: Vec<RawRoom>,
    #[serde(default)]
    pub global_wall_thickness: Option<RawDimension>,
    #[serde(default)]
    pub floor_height: Option<RawDimension>,
    /// Explicit scope/category named by the description, when present.
    #[serde(default)]
    pub project_type: Option<String>,
}

impl ExtractedPayload {
    pub fn empty() -> Self {
        Self::default()
    }

    /// No structure at all: the degraded shape an extraction failure yields.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
            && self.global_wall_thickness.is_none()
            && self.floor_height.is_none()
            && self.project_type.is_none()
    }

    /// A minimal submission carrying only room geometry.
    pub fn is_rooms_only(&self) -> bool {
        !self.rooms.is_empty()
            && self.global_wall_thickness.is_none()
            && self.floor_height.is_none()
            && self.project_type.is_none()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRoom {
    pub name: Option<String>,
    pub length_m: Option<Decimal>,
    pub width_m: Option<Decimal>,
    pub height_m: Option<Decimal>,
    pub wall_thickness_m: Option<Decimal>,
}

/// Outcome of normalizing one extraction payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GeometryReport {
    pub rooms: Vec<NormalizedRoom>,
    pub global_wall_thickness_m: Option<Decimal>,
    pub floor_height_m: Option<Decimal>,
    pub missing_fields: Vec<String>,
    pub invalid_fields: Vec<String>,
    pub unit_warnings: Vec<String>,
}

impl GeometryReport {
    pub fn is_clean(&self) -> bool {
        self.missing_fields.is_empty() && self.invalid_fields.is_empty()
    }
}

fn convert_dimension(
    dimension: Option<&RawDimension>,
    required: bool,
    label: &str,
    report: &mut GeometryReport,
) -> Option<Decimal> {
    let Some(dimension) = dimension else {
        if required {
            report.missing_fields.push(label.to_string());
        }
        return None;
    };
    match dimension.to_metres() {
        Some(metres) => Some(metres),
        None => {
            report.invalid_fields.push(format!("{label}.unit"));
            None
        }
    }
}

/// Convert every provided dimension to metres, flagging missing required
/// dimensions (`rooms[i].length`) and unconvertible ones
/// (`rooms[i].length.unit`). At least one room is required.
pub fn normalize(payload: &ExtractedPayload) -> GeometryReport {
    let mut report = GeometryReport::default();

    if payload.rooms.is_empty() {
        report.missing_fields.push("rooms".to_string());
    }

    for (index, room) in payload.rooms.iter().enumerate() {
        let length_m = convert_dimension(
            room.length.as_ref(),
            true,
            &format!("rooms[{index}].length"),
            &mut report,
        );
        let width_m = convert_dimension(
            room.width.as_ref(),
            true,
            &format!("rooms[{index}].width"),
            &mut report,
        );
        let height_m = convert_dimension(
            room.height.as_ref(),
            false,
            &format!("rooms[{index}].height"),
            &mut report,
        );
        let wall_thickness_m = convert_dimension(
            room.wall_thickness.as_ref(),
            false,
            &format!("rooms[{index}].wall_thickness"),
            &mut report,
        );
        report.rooms.push(NormalizedRoom {
            name: room.name.clone(),
            length_m,
            width_m,
            height_m,
            wall_thickness_m,
        });
    }

    report.global_wall_thickness_m = convert_dimension(
        payload.global_wall_thickness.as_ref(),
        false,
        "global_wall_thickness",
        &mut report,
    );
    report.floor_height_m =
        convert_dimension(payload.floor_height.as_ref(), false, "floor_height", &mut report);

    report
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;
    use serde_json::json;

    use super::{normalize, ExtractedPayload, RawDimension, RawRoom};

    fn dim(value: serde_json::Value, unit: &str) -> Option<RawDimension> {
        Some(RawDimension { value, unit: unit.to_string() })
    }

    fn room(length: Option<RawDimension>, width: Option<RawDimension>) -> RawRoom {
        RawRoom { length, width, ..RawRoom::default() }
    }

    #[test]
    fn complete_room_normalizes_to_metres() {
        let payload = ExtractedPayload {
            rooms: vec![room(dim(json!(12), "ft"), dim(json!("4.5"), "m"))],
            ..ExtractedPayload::default()
        };

        let report = normalize(&payload);
        assert!(report.is_clean());
        assert_eq!(
            report.rooms[0].length_m,
            Some("3.6576".parse::<Decimal>().expect("decimal"))
        );
        assert_eq!(report.rooms[0].width_m, Some("4.5".parse::<Decimal>().expect("decimal")));
    }

    #[test]
    fn zero_rooms_is_a_missing_field() {
        let report = normalize(&ExtractedPayload::empty());
        assert_eq!(report.missing_fields, vec!["rooms".to_string()]);
    }

    #[test]
    fn missing_width_names_the_room_index() {
        let payload = ExtractedPayload {
            rooms: vec![room(dim(json!(4), "m"), None)],
            ..ExtractedPayload::default()
        };

        let report = normalize(&payload);
        assert_eq!(report.missing_fields, vec!["rooms[0].width".to_string()]);
        assert!(report.invalid_fields.is_empty());
    }

    #[test]
    fn unrecognized_unit_is_an_invalid_field() {
        let payload = ExtractedPayload {
            rooms: vec![room(dim(json!(4), "cubits"), dim(json!(5), "m"))],
            ..ExtractedPayload::default()
        };

        let report = normalize(&payload);
        assert_eq!(report.invalid_fields, vec!["rooms[0].length.unit".to_string()]);
        assert!(report.missing_fields.is_empty());
    }

    #[test]
    fn non_numeric_value_is_an_invalid_field() {
        let payload = ExtractedPayload {
            rooms: vec![room(dim(json!("four"), "m"), dim(json!(5), "m"))],
            ..ExtractedPayload::default()
        };

        let report = normalize(&payload);
        assert_eq!(report.invalid_fields, vec!["rooms[0].length.unit".to_string()]);
    }

    #[test]
    fn optional_dimensions_do_not_report_missing() {
        let payload = ExtractedPayload {
            rooms: vec![room(dim(json!(4), "m"), dim(json!(5), "m"))],
            ..ExtractedPayload::default()
        };

        let report = normalize(&payload);
        assert!(report.is_clean());
        assert_eq!(report.rooms[0].height_m, None);
        assert_eq!(report.global_wall_thickness_m, None);
    }

    #[test]
    fn rooms_only_detection() {
        let minimal = ExtractedPayload {
            rooms: vec![room(dim(json!(4), "m"), dim(json!(5), "m"))],
            ..ExtractedPayload::default()
        };
        assert!(minimal.is_rooms_only());

        let scoped = ExtractedPayload {
            project_type: Some("flooring".to_string()),
            ..minimal.clone()
        };
        assert!(!scoped.is_rooms_only());
        assert!(!ExtractedPayload::empty().is_rooms_only());
    }
}
