//! Master rule catalog: seed data, category-name normalization, resilient
//! set-name matching, and the rule-set selection precedence.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::rules::{
    BoqCategory, CategoryId, MasterRuleItem, MasterRuleItemId, MasterRuleSet, MasterRuleSetId,
};
use crate::geometry::ExtractedPayload;
use crate::services::{SelectionRequest, SelectionService};

/// Deterministic fallback pair used when the selection service is
/// unavailable or returns nothing.
pub const DEFAULT_RULE_SET_NAMES: [&str; 2] = ["CC-RCC-SLAB-M20", "FLR-TILE-600x600-VIT"];

/// Raw inputs with fewer whitespace tokens than this, and no extracted
/// structure, are rejected as insufficient.
pub const MIN_INPUT_TOKENS: usize = 3;

/// How many characters of raw input are forwarded to the selection service.
pub const RAW_INPUT_EXCERPT_CHARS: usize = 1000;

#[derive(Clone, Debug)]
pub struct MasterItemSeed {
    pub key: &'static str,
    pub unit: &'static str,
    pub description: &'static str,
    pub default_value: Option<Decimal>,
    pub formula: Option<&'static str>,
}

#[derive(Clone, Debug)]
pub struct MasterSetSeed {
    pub code: &'static str,
    pub description: &'static str,
    pub category: &'static str,
    pub items: Vec<MasterItemSeed>,
}

pub fn seed_categories() -> Vec<(&'static str, &'static str)> {
    vec![
        ("earthwork", "Earthwork related rules"),
        ("cement_concrete_work", "Concrete and RCC rules"),
        ("flooring", "Flooring and tiling rules"),
    ]
}

fn item(
    key: &'static str,
    unit: &'static str,
    description: &'static str,
    default_value: Option<Decimal>,
    formula: Option<&'static str>,
) -> MasterItemSeed {
    MasterItemSeed { key, unit, description, default_value, formula }
}

/// The seeded master catalog. Defaults are engineering constants for
/// typical Indian residential construction practice.
pub fn master_catalog() -> Vec<MasterSetSeed> {
    vec![
        MasterSetSeed {
            code: "EW-EXC-TRENCH",
            description: "Foundation trench excavation",
            category: "earthwork",
            items: vec![
                item(
                    "excavation_swelling_factor",
                    "multiplier",
                    "Typical bulking/swelling factor",
                    Some(Decimal::new(120, 2)),
                    None,
                ),
                item(
                    "excavation_overbreak_allowance",
                    "multiplier",
                    "Allowance for overbreak",
                    Some(Decimal::new(105, 2)),
                    None,
                ),
                item(
                    "disposal_lead_m",
                    "m",
                    "Lead for disposal of excavated soil",
                    Some(Decimal::from(30)),
                    None,
                ),
                item(
                    "max_depth_m",
                    "m",
                    "Typical depth limit for trench without shoring",
                    Some(Decimal::new(15, 1)),
                    None,
                ),
            ],
        },
        MasterSetSeed {
            code: "EW-BACKFILL-COMPACTION",
            description: "Backfilling and compaction",
            category: "earthwork",
            items: vec![
                item(
                    "backfill_layer_thickness_m",
                    "m",
                    "Layer thickness per pass",
                    Some(Decimal::new(20, 2)),
                    None,
                ),
                item("compaction_passes", "count", "No. of passes per layer", Some(Decimal::from(4)), None),
                item(
                    "shrinkage_factor",
                    "multiplier",
                    "Shrinkage factor for compacted fill",
                    Some(Decimal::new(90, 2)),
                    None,
                ),
                item(
                    "moisture_content_percent",
                    "%",
                    "Optimum moisture content",
                    Some(Decimal::from(12)),
                    None,
                ),
            ],
        },
        MasterSetSeed {
            code: "EW-GSB-LAYER",
            description: "Granular sub-base layer",
            category: "earthwork",
            items: vec![
                item("gsb_thickness_m", "m", "Design thickness", Some(Decimal::new(15, 2)), None),
                item("gsb_density_t_per_m3", "t_per_m3", "Material density", Some(Decimal::new(190, 2)), None),
                item(
                    "gsb_wastage_multiplier",
                    "multiplier",
                    "Wastage/handling",
                    Some(Decimal::new(103, 2)),
                    None,
                ),
            ],
        },
        MasterSetSeed {
            code: "CC-PCC-1-4-8",
            description: "Plain cement concrete 1:4:8",
            category: "cement_concrete_work",
            items: vec![
                item("pcc_thickness_m", "m", "PCC thickness", Some(Decimal::new(10, 2)), None),
                item("cement_bags_per_m3", "bags_per_m3", "Cement consumption", Some(Decimal::new(50, 1)), None),
                item("sand_m3_per_m3", "m3_per_m3", "Fine aggregate per m3", Some(Decimal::new(44, 2)), None),
                item(
                    "aggregate_m3_per_m3",
                    "m3_per_m3",
                    "Coarse aggregate per m3",
                    Some(Decimal::new(88, 2)),
                    None,
                ),
                item(
                    "pcc_wastage_multiplier",
                    "multiplier",
                    "Wastage/handling",
                    Some(Decimal::new(102, 2)),
                    None,
                ),
            ],
        },
        MasterSetSeed {
            code: "CC-RCC-SLAB-M20",
            description: "RCC slab M20",
            category: "cement_concrete_work",
            items: vec![
                item("slab_thickness_m", "m", "Slab thickness", Some(Decimal::new(12, 2)), None),
                item("cement_bags_per_m3", "bags_per_m3", "Cement consumption", Some(Decimal::new(74, 1)), None),
                item("sand_m3_per_m3", "m3_per_m3", "Fine aggregate per m3", Some(Decimal::new(45, 2)), None),
                item(
                    "aggregate_m3_per_m3",
                    "m3_per_m3",
                    "Coarse aggregate per m3",
                    Some(Decimal::new(90, 2)),
                    None,
                ),
                item("steel_kg_per_m3", "kg_per_m3", "Reinforcement density", Some(Decimal::from(80)), None),
                item("shuttering_m2_per_m3", "m2_per_m3", "Formwork per m3", Some(Decimal::new(85, 1)), None),
                item("admixture_L_per_m3", "L_per_m3", "Plasticizer/admixture", Some(Decimal::new(20, 1)), None),
            ],
        },
        MasterSetSeed {
            code: "CC-RCC-BEAM-M20",
            description: "RCC beam M20",
            category: "cement_concrete_work",
            items: vec![
                item("steel_kg_per_m3", "kg_per_m3", "Reinforcement density", Some(Decimal::from(110)), None),
                item("formwork_m2_per_m3", "m2_per_m3", "Formwork per m3", Some(Decimal::from(16)), None),
                item(
                    "beam_wastage_multiplier",
                    "multiplier",
                    "Wastage/handling",
                    Some(Decimal::new(103, 2)),
                    None,
                ),
                item(
                    "concrete_m3_per_m_run",
                    "m3_per_m",
                    "Concrete per meter run (depends on section)",
                    None,
                    Some("beam_width_m * beam_depth_m"),
                ),
            ],
        },
        MasterSetSeed {
            code: "CC-COLUMN-M20",
            description: "RCC column M20",
            category: "cement_concrete_work",
            items: vec![
                item("steel_kg_per_m3", "kg_per_m3", "Reinforcement density", Some(Decimal::from(120)), None),
                item("formwork_m2_per_m3", "m2_per_m3", "Formwork per m3", Some(Decimal::from(14)), None),
                item(
                    "column_wastage_multiplier",
                    "multiplier",
                    "Wastage/handling",
                    Some(Decimal::new(103, 2)),
                    None,
                ),
                item(
                    "concrete_m3_per_column",
                    "m3",
                    "Concrete per column (depends on section)",
                    None,
                    Some("column_width_m * column_depth_m * clear_height_m"),
                ),
            ],
        },
        MasterSetSeed {
            code: "FLR-SCREED-1-4",
            description: "Cement screed 1:4",
            category: "flooring",
            items: vec![
                item("screed_thickness_m", "m", "Screed thickness", Some(Decimal::new(3, 2)), None),
                item("cement_bags_per_m3", "bags_per_m3", "Cement consumption", Some(Decimal::new(70, 1)), None),
                item("sand_m3_per_m3", "m3_per_m3", "Fine aggregate per m3", Some(Decimal::new(50, 2)), None),
                item(
                    "screed_wastage_multiplier",
                    "multiplier",
                    "Wastage/handling",
                    Some(Decimal::new(105, 2)),
                    None,
                ),
            ],
        },
        MasterSetSeed {
            code: "FLR-TILE-600x600-VIT",
            description: "Vitrified floor tile 600x600",
            category: "flooring",
            items: vec![
                item("tile_size_m2", "m2_per_tile", "Tile area", Some(Decimal::new(36, 2)), None),
                item(
                    "tile_wastage_multiplier",
                    "multiplier",
                    "Wastage/cutting",
                    Some(Decimal::new(105, 2)),
                    None,
                ),
                item("adhesive_kg_per_m2", "kg_per_m2", "Tile adhesive", Some(Decimal::new(40, 1)), None),
                item("grout_kg_per_m2", "kg_per_m2", "Grout consumption", Some(Decimal::new(5, 1)), None),
            ],
        },
        MasterSetSeed {
            code: "FLR-SKIRT-100",
            description: "Tile skirting 100 mm",
            category: "flooring",
            items: vec![
                item("skirting_height_m", "m", "Skirting height", Some(Decimal::new(10, 2)), None),
                item("adhesive_kg_per_m2", "kg_per_m2", "Adhesive", Some(Decimal::new(30, 1)), None),
                item("grout_kg_per_m2", "kg_per_m2", "Grout", Some(Decimal::new(4, 1)), None),
                item(
                    "skirting_wastage_multiplier",
                    "multiplier",
                    "Wastage/cutting",
                    Some(Decimal::new(105, 2)),
                    None,
                ),
            ],
        },
    ]
}

/// Expand the seed catalog into domain entities with fresh identifiers.
/// The relative order of sets and items follows the seed definition.
pub fn seed_entities() -> (Vec<BoqCategory>, Vec<MasterRuleSet>, Vec<MasterRuleItem>) {
    let categories: Vec<BoqCategory> = seed_categories()
        .into_iter()
        .map(|(name, description)| BoqCategory {
            id: CategoryId::generate(),
            name: name.to_string(),
            description: Some(description.to_string()),
        })
        .collect();

    let mut masters = Vec::new();
    let mut items = Vec::new();
    for seed in master_catalog() {
        let Some(category) = categories.iter().find(|category| category.name == seed.category)
        else {
            continue;
        };
        let master = MasterRuleSet {
            id: MasterRuleSetId::generate(),
            name: seed.code.to_string(),
            category_id: category.id.clone(),
            description: Some(seed.description.to_string()),
            version: 1,
            is_active: true,
        };
        for item in &seed.items {
            items.push(MasterRuleItem {
                id: MasterRuleItemId::generate(),
                master_rule_set_id: master.id.clone(),
                key: item.key.to_string(),
                unit: Some(item.unit.to_string()),
                description: Some(item.description.to_string()),
                default_value: item.default_value,
                formula: item.formula.map(str::to_string),
            });
        }
        masters.push(master);
    }

    (categories, masters, items)
}

/// Canonical category-name form: lowercase, trimmed, spaces as underscores.
pub fn normalize_category_name(raw: &str) -> String {
    raw.trim().to_lowercase().replace(' ', "_")
}

/// Case- and whitespace-normalization-insensitive category lookup.
pub fn find_category<'a>(categories: &'a [BoqCategory], name: &str) -> Option<&'a BoqCategory> {
    let wanted = normalize_category_name(name);
    categories.iter().find(|category| normalize_category_name(&category.name) == wanted)
}

/// Match service-selected names against the catalog, tolerating near-miss
/// names: case-insensitive exact match first, then substring containment in
/// either direction. Catalog order is preserved; duplicates collapse.
pub fn match_master_names(masters: &[MasterRuleSet], wanted: &[String]) -> Vec<MasterRuleSet> {
    let wanted: Vec<String> = wanted.iter().map(|name| name.trim().to_lowercase()).collect();
    masters
        .iter()
        .filter(|master| {
            let catalog_name = master.name.to_lowercase();
            wanted.iter().any(|name| {
                !name.is_empty()
                    && (catalog_name == *name
                        || catalog_name.contains(name.as_str())
                        || name.contains(catalog_name.as_str()))
            })
        })
        .cloned()
        .collect()
}

/// Which branch of the selection precedence produced the decision.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "path", rename_all = "snake_case")]
pub enum SelectionPath {
    ExplicitCategory { category: String },
    UnknownCategoryFullCatalog { requested: String },
    RoomsOnlyFullCatalog,
    LlmSelection { notes: Option<String> },
    FallbackDefaults { reason: String },
}

/// Outcome of the rule catalog resolver. Input-quality problems are
/// structured variants, not errors.
#[derive(Clone, Debug, PartialEq)]
pub enum RuleSelection {
    Selected { masters: Vec<MasterRuleSet>, path: SelectionPath },
    MissingFields { missing_fields: Vec<String> },
    InsufficientDetails,
    NoMasterRulesAvailable,
}

fn active<'a>(masters: &'a [MasterRuleSet]) -> impl Iterator<Item = &'a MasterRuleSet> {
    masters.iter().filter(|master| master.is_active)
}

fn select_all_active(masters: &[MasterRuleSet], path: SelectionPath) -> RuleSelection {
    let chosen: Vec<MasterRuleSet> = active(masters).cloned().collect();
    if chosen.is_empty() {
        return RuleSelection::NoMasterRulesAvailable;
    }
    RuleSelection::Selected { masters: chosen, path }
}

/// Decide which master rule sets apply, first match wins:
///
/// 1. explicit known category → every set under it (selection service skipped)
/// 2. explicit unknown category → full catalog
/// 3. rooms-only payload → completeness check, then full catalog
/// 4. no structure and a too-short raw input → insufficient details
/// 5. selection service over the catalog, resilient name matching
/// 6. service unavailable/empty → deterministic fallback pair
pub async fn resolve_rule_sets<S>(
    service: &S,
    categories: &[BoqCategory],
    masters: &[MasterRuleSet],
    payload: Option<&ExtractedPayload>,
    raw_input_text: &str,
) -> RuleSelection
where
    S: SelectionService + ?Sized,
{
    let payload = payload.filter(|payload| !payload.is_empty());

    if let Some(requested) = payload.and_then(|payload| payload.project_type.as_deref()) {
        if !requested.trim().is_empty() {
            if let Some(category) = find_category(categories, requested) {
                let chosen: Vec<MasterRuleSet> = active(masters)
                    .filter(|master| master.category_id == category.id)
                    .cloned()
                    .collect();
                if chosen.is_empty() {
                    return RuleSelection::NoMasterRulesAvailable;
                }
                return RuleSelection::Selected {
                    masters: chosen,
                    path: SelectionPath::ExplicitCategory { category: category.name.clone() },
                };
            }
            return select_all_active(
                masters,
                SelectionPath::UnknownCategoryFullCatalog {
                    requested: normalize_category_name(requested),
                },
            );
        }
    }

    if let Some(payload) = payload {
        if payload.is_rooms_only() {
            let mut missing_fields = Vec::new();
            for (index, room) in payload.rooms.iter().enumerate() {
                if room.length.is_none() {
                    missing_fields.push(format!("rooms[{index}].length"));
                }
                if room.width.is_none() {
                    missing_fields.push(format!("rooms[{index}].width"));
                }
            }
            if !missing_fields.is_empty() {
                return RuleSelection::MissingFields { missing_fields };
            }
            return select_all_active(masters, SelectionPath::RoomsOnlyFullCatalog);
        }
    }

    if payload.is_none() && raw_input_text.split_whitespace().count() < MIN_INPUT_TOKENS {
        return RuleSelection::InsufficientDetails;
    }

    let catalog_names: Vec<String> = active(masters).map(|master| master.name.clone()).collect();
    let excerpt: String = raw_input_text.chars().take(RAW_INPUT_EXCERPT_CHARS).collect();
    let request = SelectionRequest {
        catalog_names: &catalog_names,
        extracted_payload: payload,
        raw_input_excerpt: &excerpt,
    };

    let (wanted, path) = match service.select_rule_sets(request).await {
        Ok(response) if !response.selected.is_empty() => {
            (response.selected, SelectionPath::LlmSelection { notes: response.notes })
        }
        Ok(_) => (
            DEFAULT_RULE_SET_NAMES.iter().map(|name| name.to_string()).collect(),
            SelectionPath::FallbackDefaults { reason: "empty_selection".to_string() },
        ),
        Err(error) if error.is_degradable() => {
            tracing::warn!(
                event_name = "pipeline.select_rules.selector_degraded",
                error = %error,
                "selection service degraded to deterministic fallback"
            );
            (
                DEFAULT_RULE_SET_NAMES.iter().map(|name| name.to_string()).collect(),
                SelectionPath::FallbackDefaults { reason: error.to_string() },
            )
        }
        Err(error) => {
            // Missing credentials: treated like unavailability at this seam,
            // construction of the client is where it is fatal.
            (
                DEFAULT_RULE_SET_NAMES.iter().map(|name| name.to_string()).collect(),
                SelectionPath::FallbackDefaults { reason: error.to_string() },
            )
        }
    };

    let active_masters: Vec<MasterRuleSet> = active(masters).cloned().collect();
    let chosen = match_master_names(&active_masters, &wanted);
    if chosen.is_empty() {
        return RuleSelection::NoMasterRulesAvailable;
    }
    RuleSelection::Selected { masters: chosen, path }
}
