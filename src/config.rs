//! Ruleset: the balance data consumed by the core.
//!
//! Nothing in here is computed by the simulation; it is loaded once (from
//! JSON or the built-in [`Ruleset::default`]) and shared read-only by every
//! village. Game-balance numbers live here and only here.

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::game::{CostModel, ResourceKind, Resources, SlotIndex};

/// What a building type contributes to its village.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "resource")]
pub enum BuildingRole {
    /// A resource field producing one resource.
    Field(ResourceKind),
    /// Raises lumber/clay/iron capacity.
    Warehouse,
    /// Raises crop capacity.
    Granary,
    /// Shortens construction times.
    MainBuilding,
    /// No effect on the progression core beyond population.
    Other,
}

/// Balance data for one building or field type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingRules {
    /// Unique type name.
    pub name: String,
    /// Effect on the village.
    pub role: BuildingRole,
    /// Cost of level 1; later levels grow geometrically.
    pub base_cost: Resources,
    /// Build time of level 1 in seconds.
    pub base_secs: u64,
    /// Highest level the type can reach.
    pub max_level: u32,
    /// Inhabitants added per level (each costs one crop per hour).
    #[serde(default)]
    pub population: u32,
}

impl BuildingRules {
    /// Whether this type lives in a resource-field slot.
    #[must_use]
    pub const fn is_field(&self) -> bool {
        matches!(self.role, BuildingRole::Field(_))
    }
}

/// Balance data for one unit type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitRules {
    /// Unique type name.
    pub name: String,
    /// Cost of a single unit.
    pub cost: Resources,
    /// Training time of a single unit in seconds.
    pub train_secs: u64,
    /// Movement speed in fields per hour.
    pub speed: f64,
    /// Offensive strength.
    #[serde(default)]
    pub attack: u32,
    /// Defensive strength.
    #[serde(default)]
    pub defense: u32,
    /// Resources one unit can carry home from a raid.
    #[serde(default)]
    pub carry: u64,
    /// Crop eaten per hour while stationed at home.
    #[serde(default)]
    pub upkeep: u32,
    /// Loyalty removed per surviving unit on a successful attack; zero for
    /// units that cannot conquer.
    #[serde(default)]
    pub conquest_power: f64,
    /// Whether the unit can found new villages.
    #[serde(default)]
    pub settler: bool,
    /// Building that must exist (level 1 or more) to train this unit.
    #[serde(default)]
    pub requires: Option<String>,
}

/// Warehouse and granary capacity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StorageRules {
    /// Capacity with no storage building.
    pub base: u64,
    /// Capacity contributed by a level-1 storage building.
    pub first_level: u64,
    /// Per-level growth of a storage building's capacity.
    pub growth: f64,
}

impl StorageRules {
    /// Capacity contributed by one storage building at `level`.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    pub fn capacity_at(&self, level: u32) -> u64 {
        if level == 0 {
            return 0;
        }
        let exponent = i32::try_from(level - 1).unwrap_or(i32::MAX);
        (self.first_level as f64 * self.growth.powi(exponent)).floor() as u64
    }
}

/// One kind of celebration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CelebrationRules {
    /// Debited when the celebration starts.
    pub cost: Resources,
    /// Duration in seconds before the loyalty bonus applies.
    pub duration_secs: u64,
    /// Loyalty points added on completion.
    pub loyalty: f64,
}

/// Small and large celebrations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CelebrationTable {
    /// The cheap, short celebration.
    pub small: CelebrationRules,
    /// The expensive, long celebration.
    pub large: CelebrationRules,
}

/// Loyalty loss and recovery.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConquestRules {
    /// Smallest loss a successful conquest attack inflicts.
    pub min_loss: f64,
    /// Largest loss a successful conquest attack inflicts.
    pub max_loss: f64,
    /// Loyalty a village has right after changing hands.
    pub post_conquest_loyalty: f64,
    /// Loyalty regained per hour while below 100.
    pub recovery_per_hour: f64,
}

/// Merchant movement and cargo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MerchantRules {
    /// Fields per hour.
    pub speed: f64,
    /// Resources one merchant carries.
    pub capacity: u64,
    /// Building whose level is the number of merchants a village has.
    /// Without it, or before it is built, a village has one merchant.
    #[serde(default)]
    pub building: Option<String>,
}

/// A building present in every newly founded village.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartingBuilding {
    /// Slot it occupies.
    pub slot: SlotIndex,
    /// Building type.
    pub building: String,
    /// Initial level.
    pub level: u32,
}

/// Complete balance data for one game world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ruleset {
    /// Divides every build, training, celebration and travel duration.
    pub world_speed: f64,
    /// Per-level cost and build-time growth ratio.
    pub cost_growth: f64,
    /// Concurrent construction/training orders per village.
    pub queue_depth: usize,
    /// Fraction of the debited cost refunded when construction is cancelled.
    pub cancel_refund: f64,
    /// Seconds a speed-1 unit needs to cross one field.
    pub secs_per_field: u64,
    /// Coordinates are valid in `-map_radius..=map_radius` on both axes.
    pub map_radius: i32,
    /// Seconds after departure during which a dispatch may be called back.
    pub dispatch_cancel_window_secs: u64,
    /// Settler units consumed by founding a village.
    pub settlers_required: u32,
    /// Construction speed bonus per main building level (0.05 = 5%).
    pub main_building_bonus: f64,
    /// Hourly output of a resource field, indexed by level.
    pub field_production: Vec<u64>,
    /// Field type for each resource-field slot, starting at slot 1.
    pub field_layout: Vec<String>,
    /// Number of building slots after the resource fields.
    pub building_slots: u8,
    /// Buildings every new village starts with.
    pub starting_buildings: Vec<StartingBuilding>,
    /// Stock every new village starts with.
    pub starting_stock: Resources,
    /// Storage capacity curve.
    pub storage: StorageRules,
    /// Celebration kinds.
    pub celebrations: CelebrationTable,
    /// Conquest loyalty rules.
    pub conquest: ConquestRules,
    /// Merchant rules.
    pub merchant: MerchantRules,
    /// Building and field types.
    pub buildings: Vec<BuildingRules>,
    /// Unit types.
    pub units: Vec<UnitRules>,
}

impl Ruleset {
    /// Parse and validate a ruleset from JSON text.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON is malformed or the ruleset is invalid.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let ruleset: Self = serde_json::from_str(json)?;
        ruleset.validate()?;
        Ok(ruleset)
    }

    /// Read, parse and validate a ruleset file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        let ruleset = Self::from_json_str(&text)?;
        tracing::debug!(
            path = %path.display(),
            buildings = ruleset.buildings.len(),
            units = ruleset.units.len(),
            "loaded ruleset"
        );
        Ok(ruleset)
    }

    /// Check internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        if self.world_speed <= 0.0 {
            return invalid(format!("world_speed must be positive, got {}", self.world_speed));
        }
        if self.cost_growth <= 1.0 {
            return invalid(format!("cost_growth must exceed 1, got {}", self.cost_growth));
        }
        if self.queue_depth == 0 {
            return invalid("queue_depth must be at least 1".into());
        }
        if !(0.0..=1.0).contains(&self.cancel_refund) {
            return invalid(format!("cancel_refund must be in 0..=1, got {}", self.cancel_refund));
        }
        if self.secs_per_field == 0 {
            return invalid("secs_per_field must be positive".into());
        }
        if self.map_radius <= 0 {
            return invalid("map_radius must be positive".into());
        }
        if self.field_production.is_empty() {
            return invalid("field_production table is empty".into());
        }
        if self.merchant.speed <= 0.0 || self.merchant.capacity == 0 {
            return invalid("merchants need positive speed and capacity".into());
        }
        let c = &self.conquest;
        if !(0.0 < c.min_loss && c.min_loss <= c.max_loss && c.max_loss <= 100.0) {
            return invalid(format!(
                "conquest loss range {}..={} must satisfy 0 < min <= max <= 100",
                c.min_loss, c.max_loss
            ));
        }
        if !(0.0..=100.0).contains(&c.post_conquest_loyalty) || c.recovery_per_hour < 0.0 {
            return invalid("post-conquest loyalty or recovery rate out of range".into());
        }

        let mut names = HashSet::new();
        for building in &self.buildings {
            if !names.insert(building.name.as_str()) {
                return invalid(format!("duplicate building {:?}", building.name));
            }
            if building.max_level == 0 {
                return invalid(format!("building {:?} has max_level 0", building.name));
            }
            if building.is_field() && building.max_level as usize >= self.field_production.len() {
                return invalid(format!(
                    "field {:?} max_level {} exceeds the production table",
                    building.name, building.max_level
                ));
            }
        }
        for field in &self.field_layout {
            match self.building(field) {
                Some(rules) if rules.is_field() => {}
                _ => return invalid(format!("field layout names non-field {field:?}")),
            }
        }
        for start in &self.starting_buildings {
            let Some(rules) = self.building(&start.building) else {
                return invalid(format!("unknown starting building {:?}", start.building));
            };
            if rules.is_field() || !self.is_building_slot(start.slot) {
                return invalid(format!("starting building {:?} needs a building slot", start.building));
            }
            if start.level > rules.max_level {
                return invalid(format!("starting building {:?} above max level", start.building));
            }
        }
        if let Some(building) = &self.merchant.building {
            if self.building(building).is_none_or(BuildingRules::is_field) {
                return invalid(format!("merchant building {building:?} is not a building type"));
            }
        }

        let mut unit_names = HashSet::new();
        for unit in &self.units {
            if !unit_names.insert(unit.name.as_str()) {
                return invalid(format!("duplicate unit {:?}", unit.name));
            }
            if unit.speed <= 0.0 {
                return invalid(format!("unit {:?} must have positive speed", unit.name));
            }
            if let Some(required) = &unit.requires {
                if self.building(required).is_none() {
                    return invalid(format!("unit {:?} requires unknown {required:?}", unit.name));
                }
            }
        }
        Ok(())
    }

    /// Look up a building or field type.
    #[must_use]
    pub fn building(&self, name: &str) -> Option<&BuildingRules> {
        self.buildings.iter().find(|b| b.name == name)
    }

    /// Look up a unit type.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&UnitRules> {
        self.units.iter().find(|u| u.name == name)
    }

    /// The cost model implied by `cost_growth`.
    #[must_use]
    pub const fn cost_model(&self) -> CostModel {
        CostModel::new(self.cost_growth)
    }

    /// Number of resource-field slots (slots `1..=field_slots`).
    #[must_use]
    pub fn field_slots(&self) -> SlotIndex {
        SlotIndex::try_from(self.field_layout.len()).unwrap_or(SlotIndex::MAX)
    }

    /// Total slots per village.
    #[must_use]
    pub fn total_slots(&self) -> SlotIndex {
        self.field_slots().saturating_add(self.building_slots)
    }

    /// Whether `slot` is a building (non-field) slot.
    #[must_use]
    pub fn is_building_slot(&self, slot: SlotIndex) -> bool {
        slot > self.field_slots() && slot <= self.total_slots()
    }

    /// Hourly output of a field at `level`, clamped to the table.
    #[must_use]
    pub fn field_output(&self, level: u32) -> u64 {
        let idx = usize::try_from(level).unwrap_or(usize::MAX);
        self.field_production
            .get(idx)
            .or_else(|| self.field_production.last())
            .copied()
            .unwrap_or(0)
    }

    /// Per-rules celebration data.
    #[must_use]
    pub const fn celebration(&self, kind: CelebrationKind) -> &CelebrationRules {
        match kind {
            CelebrationKind::Small => &self.celebrations.small,
            CelebrationKind::Large => &self.celebrations.large,
        }
    }
}

/// Which celebration to hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CelebrationKind {
    /// Small celebration.
    Small,
    /// Large celebration.
    Large,
}

fn building(
    name: &str,
    role: BuildingRole,
    base_cost: Resources,
    base_secs: u64,
    max_level: u32,
    population: u32,
) -> BuildingRules {
    BuildingRules {
        name: name.to_string(),
        role,
        base_cost,
        base_secs,
        max_level,
        population,
    }
}

#[allow(clippy::too_many_arguments)]
fn unit(
    name: &str,
    cost: Resources,
    train_secs: u64,
    speed: f64,
    attack: u32,
    defense: u32,
    carry: u64,
    upkeep: u32,
) -> UnitRules {
    UnitRules {
        name: name.to_string(),
        cost,
        train_secs,
        speed,
        attack,
        defense,
        carry,
        upkeep,
        conquest_power: 0.0,
        settler: false,
        requires: Some("barracks".to_string()),
    }
}

impl Default for Ruleset {
    fn default() -> Self {
        use BuildingRole::{Field, Granary, MainBuilding, Other, Warehouse};
        use ResourceKind::{Clay, Crop, Iron, Lumber};

        let mut field_layout = Vec::new();
        for (name, count) in [("woodcutter", 4), ("clay_pit", 4), ("iron_mine", 4), ("cropland", 6)] {
            field_layout.extend(std::iter::repeat_n(name.to_string(), count));
        }

        let senator = UnitRules {
            conquest_power: 25.0,
            requires: Some("residence".to_string()),
            ..unit("senator", Resources::new(30750, 27200, 45000, 37500), 90700, 4.0, 50, 40, 0, 5)
        };
        let settler = UnitRules {
            settler: true,
            requires: Some("residence".to_string()),
            ..unit("settler", Resources::new(5800, 5300, 7200, 5500), 26900, 5.0, 0, 80, 3000, 1)
        };

        Self {
            world_speed: 1.0,
            cost_growth: 1.28,
            queue_depth: 1,
            cancel_refund: 1.0,
            secs_per_field: 3600,
            map_radius: 200,
            dispatch_cancel_window_secs: 90,
            settlers_required: 3,
            main_building_bonus: 0.05,
            field_production: vec![2, 5, 9, 15, 22, 33, 50, 70, 100, 145, 200],
            field_layout,
            building_slots: 22,
            starting_buildings: vec![StartingBuilding {
                slot: 19,
                building: "main_building".to_string(),
                level: 1,
            }],
            starting_stock: Resources::splat(750),
            storage: StorageRules {
                base: 800,
                first_level: 1200,
                growth: 1.3,
            },
            celebrations: CelebrationTable {
                small: CelebrationRules {
                    cost: Resources::new(6400, 6650, 5940, 1340),
                    duration_secs: 86_400,
                    loyalty: 5.0,
                },
                large: CelebrationRules {
                    cost: Resources::new(29700, 33250, 32000, 6700),
                    duration_secs: 216_000,
                    loyalty: 15.0,
                },
            },
            conquest: ConquestRules {
                min_loss: 20.0,
                max_loss: 30.0,
                post_conquest_loyalty: 25.0,
                recovery_per_hour: 1.0,
            },
            merchant: MerchantRules {
                speed: 16.0,
                capacity: 500,
                building: Some("marketplace".to_string()),
            },
            buildings: vec![
                building("woodcutter", Field(Lumber), Resources::new(40, 100, 50, 60), 260, 10, 2),
                building("clay_pit", Field(Clay), Resources::new(80, 40, 80, 50), 220, 10, 2),
                building("iron_mine", Field(Iron), Resources::new(100, 80, 30, 60), 450, 10, 3),
                building("cropland", Field(Crop), Resources::new(70, 90, 70, 20), 150, 10, 0),
                building("main_building", MainBuilding, Resources::new(70, 40, 60, 20), 2620, 20, 2),
                building("warehouse", Warehouse, Resources::new(130, 160, 90, 40), 2000, 20, 1),
                building("granary", Granary, Resources::new(80, 100, 70, 20), 1600, 20, 1),
                building("barracks", Other, Resources::new(210, 140, 260, 120), 2000, 20, 4),
                building("marketplace", Other, Resources::new(80, 70, 120, 70), 1800, 20, 4),
                building("residence", Other, Resources::new(580, 460, 350, 180), 2000, 20, 1),
                building("rally_point", Other, Resources::new(110, 160, 90, 70), 2000, 20, 1),
            ],
            units: vec![
                unit("legionnaire", Resources::new(120, 100, 150, 30), 1600, 6.0, 40, 35, 50, 1),
                unit("praetorian", Resources::new(100, 130, 160, 70), 1760, 5.0, 30, 65, 20, 1),
                unit("imperian", Resources::new(150, 160, 210, 80), 1920, 7.0, 70, 40, 50, 1),
                unit("equites_imperatoris", Resources::new(550, 440, 320, 100), 2960, 14.0, 120, 65, 100, 3),
                senator,
                settler,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ruleset_is_valid() {
        let rules = Ruleset::default();
        rules.validate().unwrap();
        assert_eq!(rules.field_slots(), 18);
        assert_eq!(rules.total_slots(), 40);
        assert!(rules.is_building_slot(19));
        assert!(!rules.is_building_slot(18));
        assert!(!rules.is_building_slot(41));
    }

    #[test]
    fn test_json_roundtrip_preserves_ruleset() {
        let rules = Ruleset::default();
        let json = serde_json::to_string(&rules).unwrap();
        let parsed = Ruleset::from_json_str(&json).unwrap();
        assert_eq!(parsed, rules);
    }

    #[test]
    fn test_rejects_non_growing_costs() {
        let rules = Ruleset {
            cost_growth: 1.0,
            ..Ruleset::default()
        };
        assert!(matches!(rules.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_zero_speed_unit() {
        let mut rules = Ruleset::default();
        rules.units[0].speed = 0.0;
        let err = rules.validate().unwrap_err();
        assert!(err.to_string().contains("positive speed"));
    }

    #[test]
    fn test_rejects_inverted_loss_range() {
        let mut rules = Ruleset::default();
        rules.conquest.min_loss = 40.0;
        assert!(rules.validate().is_err());
    }

    #[test]
    fn test_storage_curve() {
        let storage = Ruleset::default().storage;
        assert_eq!(storage.capacity_at(0), 0);
        assert_eq!(storage.capacity_at(1), 1200);
        assert_eq!(storage.capacity_at(2), 1560);
    }

    #[test]
    fn test_field_output_clamps_to_table() {
        let rules = Ruleset::default();
        assert_eq!(rules.field_output(0), 2);
        assert_eq!(rules.field_output(10), 200);
        assert_eq!(rules.field_output(99), 200);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let err = Ruleset::load(Path::new("/definitely/not/here.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
