//! Ticker symbols with composite decomposition.

use super::define_identifier;

define_identifier!(
    Symbol,
    "A ticker symbol as quoted by its venue (e.g. `AUD/USD`, `ES.c.0`)."
);

impl Symbol {
    /// Byte offset of the first `.` after the leading character, if any.
    fn separator(&self) -> Option<usize> {
        self.0
            .get(1..)
            .and_then(|rest| rest.find('.'))
            .map(|pos| pos + 1)
    }

    /// Whether the symbol is composite (has a `.` after its first character).
    ///
    /// Composite symbols such as `CL.FUT` or `ES.c.0` name a family of
    /// instruments sharing the root before the separator.
    #[must_use]
    pub fn is_composite(&self) -> bool {
        self.separator().is_some()
    }

    /// The root of the symbol: the text before the first separator, or the
    /// whole value when the symbol is not composite.
    #[must_use]
    pub fn root(&self) -> &str {
        self.separator().map_or(self.as_str(), |pos| &self.0[..pos])
    }

    /// The wildcard topic covering every member of the symbol's family:
    /// `root*` when composite, otherwise the value unchanged.
    #[must_use]
    pub fn topic(&self) -> String {
        if self.is_composite() {
            format!("{}*", self.root())
        } else {
            self.0.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;
    use test_case::test_case;

    use super::*;

    #[test_case("AUDUSD", false, "AUDUSD", "AUDUSD")]
    #[test_case("AUD/USD", false, "AUD/USD", "AUD/USD")]
    #[test_case("CL.FUT", true, "CL", "CL*")]
    #[test_case("LO.OPT", true, "LO", "LO*")]
    #[test_case("ES.c.0", true, "ES", "ES*")]
    fn composite_decomposition(value: &str, composite: bool, root: &str, topic: &str) {
        let symbol = Symbol::new(value).unwrap();
        assert_eq!(symbol.is_composite(), composite);
        assert_eq!(symbol.root(), root);
        assert_eq!(symbol.topic(), topic);
    }

    #[test]
    fn leading_dot_is_part_of_root() {
        let symbol = Symbol::new(".IDX").unwrap();
        assert!(!symbol.is_composite());
        assert_eq!(symbol.root(), ".IDX");

        let symbol = Symbol::new(".IDX.X").unwrap();
        assert!(symbol.is_composite());
        assert_eq!(symbol.root(), ".IDX");
        assert_eq!(symbol.topic(), ".IDX*");
    }

    #[test]
    fn repr_and_display() {
        let symbol = Symbol::new("AUD/USD").unwrap();
        assert_eq!(symbol.to_string(), "AUD/USD");
        assert_eq!(format!("{symbol:?}"), "Symbol('AUD/USD')");
    }

    proptest! {
        #[test]
        fn composite_iff_root_differs(value in "[A-Za-z0-9/.]{1,16}") {
            let symbol = Symbol::new(value.clone()).unwrap();
            prop_assert_eq!(symbol.is_composite(), symbol.root() != symbol.as_str());
            if symbol.is_composite() {
                prop_assert_eq!(symbol.topic(), format!("{}*", symbol.root()));
            } else {
                prop_assert_eq!(symbol.topic(), value);
            }
        }

        #[test]
        fn display_round_trip(value in "[A-Z0-9/.-]{1,16}") {
            let symbol = Symbol::new(value).unwrap();
            let parsed: Symbol = symbol.to_string().parse().unwrap();
            prop_assert_eq!(parsed, symbol);
        }
    }
}
