/// A variable from a service's state table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateVariable {
    pub name: String,
    pub data_type: String,
    /// Whether changes are delivered through GENA events; defaults to true
    pub send_events: bool,
    pub multicast: bool,
    pub default_value: Option<String>,
    pub allowed_values: Vec<String>,
    pub allowed_value_range: Option<AllowedValueRange>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedValueRange {
    pub minimum: String,
    pub maximum: String,
    pub step: Option<String>,
}

impl StateVariable {
    /// Whether `value` satisfies the allowed value list, if the variable has one
    pub fn allows(&self, value: &str) -> bool {
        self.allowed_values.is_empty() || self.allowed_values.iter().any(|allowed| allowed == value)
    }
}
