//! Partner filters: client-declared predicates over NAME fields, resolved
//! lazily against the External control function set.
use crate::name::Name;

/// A single predicate over one NAME field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NameFieldPredicate {
    ManufacturerCode(u16),
    FunctionCode(u8),
    DeviceClass(u8),
    IndustryGroup(u8),
    IdentityNumber(u32),
    ArbitraryAddressCapable(bool),
}

impl NameFieldPredicate {
    fn matches(self, name: Name) -> bool {
        match self {
            Self::ManufacturerCode(v) => name.manufacturer_code() == v,
            Self::FunctionCode(v) => name.function_code() == v,
            Self::DeviceClass(v) => name.device_class() == v,
            Self::IndustryGroup(v) => name.industry_group() == v,
            Self::IdentityNumber(v) => name.identity_number() == v,
            Self::ArbitraryAddressCapable(v) => name.is_arbitrary_address_capable() == v,
        }
    }
}

/// A partner filter: the conjunction of every predicate it carries. An empty
/// filter matches every NAME — callers should avoid constructing one unless
/// that is intended.
#[derive(Debug, Clone, Default)]
pub struct NameFilter {
    predicates: Vec<NameFieldPredicate>,
}

impl NameFilter {
    pub fn new() -> Self {
        Self {
            predicates: Vec::new(),
        }
    }

    pub fn with(mut self, predicate: NameFieldPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// True when every predicate in this filter matches `name`.
    pub fn matches(&self, name: Name) -> bool {
        self.predicates.iter().all(|p| p.matches(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_matches_anything() {
        let filter = NameFilter::new();
        assert!(filter.matches(Name::from_raw(0)));
        assert!(filter.matches(Name::from_raw(u64::MAX)));
    }

    #[test]
    fn conjunction_requires_every_predicate() {
        let name = Name::builder()
            .manufacturer_code(69)
            .function_code(130)
            .build();

        let filter = NameFilter::new()
            .with(NameFieldPredicate::ManufacturerCode(69))
            .with(NameFieldPredicate::FunctionCode(130));
        assert!(filter.matches(name));

        let filter_mismatch = NameFilter::new()
            .with(NameFieldPredicate::ManufacturerCode(69))
            .with(NameFieldPredicate::FunctionCode(131));
        assert!(!filter_mismatch.matches(name));
    }
}
