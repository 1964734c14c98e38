mod anchors;
mod basic_attributes;
mod compiled;
mod dependencies;
mod raw;
mod regex;

pub use anchors::AnchorActive;
pub use basic_attributes::{BasicScopeAttributes, BasicScopeAttributesProvider};
pub use compiled::*;
pub use dependencies::{AbsoluteRuleReference, ScopeDependencyProcessor};
pub use raw::{RawCaptures, RawGrammar, RawRepository, RawRule};
pub use regex::{CompiledRule, RegExpSource, RegExpSourceList, RuleMatch};

pub(crate) use compiled::{PreparedGrammar, RuleFactory};
