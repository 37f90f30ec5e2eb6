//! 2.0.1 Device Model (§4.2.1): components × variables × attributes.
//!
//! Generalized from the teacher's `DeviceReportStore`
//! (`application/charging/services/device_report.rs`), which aggregates a
//! flat `Vec<ReportVariable>` behind a `DashMap`, into the full tree the
//! spec requires: independent reader/writer locks per `Component` and per
//! `Variable`, with the tree-level lock held only for insertion/removal.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};

use crate::error::DeviceModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum AttributeType {
    Actual,
    Target,
    MinSet,
    MaxSet,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum Mutability {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableAttribute {
    pub value: String,
    pub mutability: Mutability,
    pub persistent: bool,
    pub constant: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct VariableCharacteristics {
    pub data_type: String,
    pub unit: Option<String>,
    pub min_limit: Option<f64>,
    pub max_limit: Option<f64>,
    pub values_list: Option<Vec<String>>,
}

pub struct Variable {
    pub characteristics: VariableCharacteristics,
    attributes: RwLock<HashMap<AttributeType, VariableAttribute>>,
}

impl Variable {
    pub fn new(characteristics: VariableCharacteristics) -> Self {
        Self {
            characteristics,
            attributes: RwLock::new(HashMap::new()),
        }
    }

    pub fn set_attribute(&self, attr_type: AttributeType, attribute: VariableAttribute) {
        self.attributes.write().unwrap().insert(attr_type, attribute);
    }

    pub fn get(&self, attr_type: AttributeType) -> Option<VariableAttribute> {
        self.attributes.read().unwrap().get(&attr_type).cloned()
    }

    /// Applies a SetVariable request, enforcing mutability/constant rules (§4.2.1).
    pub fn set(&self, attr_type: AttributeType, value: String) -> Result<(), DeviceModelError> {
        let mut attrs = self.attributes.write().unwrap();
        let existing = attrs
            .get(&attr_type)
            .ok_or(DeviceModelError::NotSupportedAttributeType)?;
        if existing.constant || existing.mutability == Mutability::ReadOnly {
            return Err(DeviceModelError::Rejected);
        }
        let mut updated = existing.clone();
        updated.value = value;
        attrs.insert(attr_type, updated);
        Ok(())
    }
}

pub struct Component {
    pub name: String,
    pub instance: Option<String>,
    pub evse_id: Option<i32>,
    variables: RwLock<HashMap<String, Arc<Variable>>>,
}

impl Component {
    pub fn new(name: impl Into<String>, instance: Option<String>, evse_id: Option<i32>) -> Self {
        Self {
            name: name.into(),
            instance,
            evse_id,
            variables: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_variable(&self, name: impl Into<String>, variable: Variable) {
        self.variables
            .write()
            .unwrap()
            .insert(name.into(), Arc::new(variable));
    }

    pub fn variable(&self, name: &str) -> Option<Arc<Variable>> {
        self.variables.read().unwrap().get(name).cloned()
    }

    pub fn variable_names(&self) -> Vec<String> {
        self.variables.read().unwrap().keys().cloned().collect()
    }
}

/// The full tree. The top-level lock guards only `components`
/// insertion/removal; reads/writes of attribute values go through the
/// per-Component/per-Variable locks without touching this one (§5).
pub struct DeviceModel {
    components: RwLock<HashMap<String, Arc<Component>>>,
}

impl DeviceModel {
    pub fn new() -> Self {
        Self {
            components: RwLock::new(HashMap::new()),
        }
    }

    pub fn add_component(&self, component: Component) {
        self.components
            .write()
            .unwrap()
            .insert(component.name.clone(), Arc::new(component));
    }

    pub fn component(&self, name: &str) -> Option<Arc<Component>> {
        self.components.read().unwrap().get(name).cloned()
    }

    pub fn get_variable(
        &self,
        component: &str,
        variable: &str,
        attr_type: AttributeType,
    ) -> Result<VariableAttribute, DeviceModelError> {
        let component = self
            .component(component)
            .ok_or_else(|| DeviceModelError::UnknownComponent(component.to_string()))?;
        let variable = component
            .variable(variable)
            .ok_or_else(|| DeviceModelError::UnknownVariable(variable.to_string()))?;
        variable
            .get(attr_type)
            .ok_or(DeviceModelError::NotSupportedAttributeType)
    }

    pub fn set_variable(
        &self,
        component: &str,
        variable: &str,
        attr_type: AttributeType,
        value: String,
    ) -> Result<(), DeviceModelError> {
        let component = self
            .component(component)
            .ok_or_else(|| DeviceModelError::UnknownComponent(component.to_string()))?;
        let variable = component
            .variable(variable)
            .ok_or_else(|| DeviceModelError::UnknownVariable(variable.to_string()))?;
        variable.set(attr_type, value)
    }
}

impl Default for DeviceModel {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_model() -> DeviceModel {
        let model = DeviceModel::new();
        let component = Component::new("OCPPCommCtrlr", None, None);
        let variable = Variable::new(VariableCharacteristics {
            data_type: "integer".into(),
            ..Default::default()
        });
        variable.set_attribute(
            AttributeType::Actual,
            VariableAttribute {
                value: "30".into(),
                mutability: Mutability::ReadWrite,
                persistent: true,
                constant: false,
            },
        );
        component.add_variable("HeartbeatInterval", variable);
        model.add_component(component);
        model
    }

    #[test]
    fn get_and_set_round_trip() {
        let model = sample_model();
        let attr = model
            .get_variable("OCPPCommCtrlr", "HeartbeatInterval", AttributeType::Actual)
            .unwrap();
        assert_eq!(attr.value, "30");

        model
            .set_variable("OCPPCommCtrlr", "HeartbeatInterval", AttributeType::Actual, "60".into())
            .unwrap();
        let attr = model
            .get_variable("OCPPCommCtrlr", "HeartbeatInterval", AttributeType::Actual)
            .unwrap();
        assert_eq!(attr.value, "60");
    }

    #[test]
    fn unknown_component_rejected() {
        let model = sample_model();
        let err = model
            .get_variable("Nope", "X", AttributeType::Actual)
            .unwrap_err();
        assert!(matches!(err, DeviceModelError::UnknownComponent(_)));
    }

    #[test]
    fn read_only_rejects_set() {
        let model = DeviceModel::new();
        let component = Component::new("SecurityCtrlr", None, None);
        let variable = Variable::new(VariableCharacteristics::default());
        variable.set_attribute(
            AttributeType::Actual,
            VariableAttribute {
                value: "locked".into(),
                mutability: Mutability::ReadOnly,
                persistent: true,
                constant: false,
            },
        );
        component.add_variable("Identity", variable);
        model.add_component(component);

        let err = model
            .set_variable("SecurityCtrlr", "Identity", AttributeType::Actual, "x".into())
            .unwrap_err();
        assert!(matches!(err, DeviceModelError::Rejected));
    }
}
