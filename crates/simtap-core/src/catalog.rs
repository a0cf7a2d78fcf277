//! ---
//! simtap_section: "01-telemetry-client"
//! simtap_subsection: "module"
//! simtap_type: "source"
//! simtap_scope: "code"
//! simtap_description: "Ordered field declarations and their decoded values."
//! simtap_version: "v0.0.0-prealpha"
//! simtap_owner: "tbd"
//! ---
use std::fmt;
use std::str::FromStr;

use strum::{AsRefStr, Display, EnumIter, EnumString};
use tracing::debug;

/// Unit tokens the host understands for a float64 datum.
///
/// Tokens use underscores; the host expects spaces, see [`Unit::wire_name`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr, Display, EnumIter, EnumString,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum Unit {
    Bool,
    Number,
    Position,
    #[strum(serialize = "PERCENT_OVER_100")]
    PercentOver100,
    Knots,
    Feet,
    FeetPerSecond,
    FeetPerSecondSquared,
    Kilometers,
    Meters,
    MeterPerSecond,
    MeterPerSecondSquared,
    Radians,
    Degrees,
    Enum,
}

impl Unit {
    /// Unit string as transmitted to the host (`FEET_PER_SECOND` -> `FEET PER SECOND`).
    pub fn wire_name(&self) -> String {
        self.as_ref().replace('_', " ")
    }
}

/// A named, unit-typed request for one telemetry value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDeclaration {
    pub name: String,
    pub unit: Unit,
}

impl FieldDeclaration {
    pub fn new(name: impl Into<String>, unit: Unit) -> Self {
        Self {
            name: name.into(),
            unit,
        }
    }
}

impl fmt::Display for FieldDeclaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.name, self.unit)
    }
}

/// Declaration plus the most recently decoded value.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldValue {
    pub declaration: FieldDeclaration,
    pub value: f64,
}

impl FieldValue {
    fn new(declaration: FieldDeclaration) -> Self {
        Self {
            declaration,
            value: 0.0,
        }
    }

    pub fn name(&self) -> &str {
        &self.declaration.name
    }

    pub fn unit(&self) -> Unit {
        self.declaration.unit
    }
}

/// Append-only, ordered list of declared fields.
///
/// Index `i` is bound to slot `i` of the host reply once the layout is
/// finalized, so nothing is ever removed or reordered.
#[derive(Debug, Clone, Default)]
pub struct FieldCatalog {
    fields: Vec<FieldValue>,
}

impl FieldCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a declaration. Unknown unit tokens are dropped without error and
    /// `None` is returned; otherwise the new field index.
    pub fn declare(&mut self, name: impl Into<String>, unit: &str) -> Option<usize> {
        let name = name.into();
        let Ok(unit) = Unit::from_str(unit) else {
            debug!(datum = %name, units = unit, "ignoring field with unrecognised unit token");
            return None;
        };
        self.fields
            .push(FieldValue::new(FieldDeclaration::new(name, unit)));
        Some(self.fields.len() - 1)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&FieldValue> {
        self.fields.get(index)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldValue> {
        self.fields.iter()
    }

    /// Index of the first field equal to `declaration`.
    pub fn position(&self, declaration: &FieldDeclaration) -> Option<usize> {
        self.fields
            .iter()
            .position(|field| &field.declaration == declaration)
    }

    /// Write decoded values into the given catalog indices, pairwise.
    pub(crate) fn apply(&mut self, indices: &[usize], values: &[f64]) {
        for (&index, &value) in indices.iter().zip(values) {
            if let Some(field) = self.fields.get_mut(index) {
                field.value = value;
            }
        }
    }

    /// Clone the fields at `indices`, preserving their order.
    pub(crate) fn select(&self, indices: &[usize]) -> Vec<FieldValue> {
        indices
            .iter()
            .filter_map(|&index| self.fields.get(index).cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn every_known_token_appends_in_call_order() {
        let mut catalog = FieldCatalog::new();
        for (i, unit) in Unit::iter().enumerate() {
            let index = catalog.declare(format!("field-{i}"), unit.as_ref());
            assert_eq!(index, Some(i));
        }
        assert_eq!(catalog.len(), Unit::iter().count());
        assert_eq!(catalog.get(4).map(FieldValue::unit), Some(Unit::Knots));
    }

    #[test]
    fn unknown_tokens_leave_catalog_unchanged() {
        let mut catalog = FieldCatalog::new();
        assert_eq!(catalog.declare("X", "BOGUS_UNIT"), None);
        assert_eq!(catalog.declare("Airspeed", "knots"), None);
        assert_eq!(catalog.declare("Altitude", "FEET PER SECOND"), None);
        assert!(catalog.is_empty());
    }

    #[test]
    fn token_spelling_matches_host_enumeration() {
        assert_eq!(Unit::PercentOver100.as_ref(), "PERCENT_OVER_100");
        assert_eq!(Unit::MeterPerSecondSquared.as_ref(), "METER_PER_SECOND_SQUARED");
        assert_eq!(Unit::from_str("PERCENT_OVER_100"), Ok(Unit::PercentOver100));
        assert_eq!(Unit::FeetPerSecond.wire_name(), "FEET PER SECOND");
        assert_eq!(Unit::Knots.wire_name(), "KNOTS");
    }

    #[test]
    fn declarations_compare_on_name_and_unit() {
        let a = FieldDeclaration::new("Airspeed", Unit::Knots);
        assert_eq!(a, FieldDeclaration::new("Airspeed", Unit::Knots));
        assert_ne!(a, FieldDeclaration::new("Airspeed", Unit::MeterPerSecond));
        assert_ne!(a, FieldDeclaration::new("Groundspeed", Unit::Knots));
    }

    #[test]
    fn duplicates_occupy_their_own_slots() {
        let mut catalog = FieldCatalog::new();
        catalog.declare("Altitude", "FEET");
        catalog.declare("Altitude", "FEET");
        assert_eq!(catalog.len(), 2);
        let declaration = FieldDeclaration::new("Altitude", Unit::Feet);
        assert_eq!(catalog.position(&declaration), Some(0));
    }

    #[test]
    fn apply_and_select_follow_index_order() {
        let mut catalog = FieldCatalog::new();
        catalog.declare("A", "NUMBER");
        catalog.declare("B", "NUMBER");
        catalog.declare("C", "NUMBER");
        catalog.apply(&[0, 2], &[1.5, 3.5]);
        let picked = catalog.select(&[2, 0]);
        assert_eq!(picked[0].name(), "C");
        assert_eq!(picked[0].value, 3.5);
        assert_eq!(picked[1].value, 1.5);
        assert_eq!(catalog.get(1).map(|f| f.value), Some(0.0));
    }
}
