//! Product selection: which branches an output stage writes.
//!
//! Rules are `keep <pattern>` / `drop <pattern>` commands applied in
//! configured order. A later matching rule overrides an earlier one, so the
//! decision for a product is that of the *last* rule matching it, or the
//! default polarity when nothing matches. The selection is computed once per
//! job against the product catalog and never changes afterwards.

use crate::alias::AliasTable;
use crate::error::ConfigurationError;
use common::config::Polarity;
use common::model::{BranchId, BranchType, ProductCatalog, ProductDescriptor};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;

const PRODUCT_PREFIX: &str = "product:";
const FIELD_NAMES: [&str; 4] = ["type", "module label", "instance", "process"];

/// One compiled `keep`/`drop` command
#[derive(Debug, Clone)]
struct Rule {
    text: String,
    polarity: Polarity,
    /// `None` for the bare `*` pattern
    fields: Option<[Regex; 4]>,
}

impl Rule {
    fn parse(text: &str) -> Result<Self, ConfigurationError> {
        let invalid = |reason: &str| ConfigurationError::InvalidRule {
            rule: text.to_string(),
            reason: reason.to_string(),
        };

        let tokens: Vec<&str> = text.split_whitespace().collect();
        let (verb, pattern) = match tokens.as_slice() {
            [verb, pattern] => (*verb, *pattern),
            [] => return Err(invalid("empty command")),
            [_] => return Err(invalid("expected '<keep|drop> <pattern>'")),
            _ => return Err(invalid("too many tokens")),
        };

        let polarity = match verb {
            "keep" => Polarity::Keep,
            "drop" => Polarity::Drop,
            other => return Err(invalid(&format!("unknown verb '{other}'"))),
        };

        let pattern = pattern.strip_prefix(PRODUCT_PREFIX).unwrap_or(pattern);
        if pattern == "*" {
            return Ok(Self {
                text: text.to_string(),
                polarity,
                fields: None,
            });
        }

        let parts: Vec<&str> = pattern.split('_').collect();
        if parts.len() > FIELD_NAMES.len() {
            return Err(invalid(&format!(
                "pattern has {} fields, at most 4 (type_label_instance_process) allowed",
                parts.len()
            )));
        }

        let mut compiled = Vec::with_capacity(FIELD_NAMES.len());
        for (i, name) in FIELD_NAMES.iter().enumerate() {
            let part = parts.get(i).copied().unwrap_or("*");
            if let Some(bad) = part
                .chars()
                .find(|c| !(c.is_ascii_alphanumeric() || *c == '*' || *c == '?'))
            {
                return Err(invalid(&format!("illegal character '{bad}' in {name} field")));
            }
            compiled.push(glob_to_regex(part).map_err(|e| invalid(&e.to_string()))?);
        }

        let fields: [Regex; 4] = compiled
            .try_into()
            .map_err(|_| invalid("pattern could not be compiled"))?;

        Ok(Self {
            text: text.to_string(),
            polarity,
            fields: Some(fields),
        })
    }

    fn matches(&self, desc: &ProductDescriptor) -> bool {
        match &self.fields {
            None => true,
            Some([class, label, instance, process]) => {
                class.is_match(&desc.friendly_class_name)
                    && label.is_match(&desc.module_label)
                    && instance.is_match(&desc.product_instance_name)
                    && process.is_match(&desc.process_name)
            }
        }
    }
}

/// Compile a `*`/`?` glob into an anchored regular expression
pub(crate) fn glob_to_regex(glob: &str) -> Result<Regex, regex::Error> {
    let mut pattern = String::with_capacity(glob.len() + 2);
    pattern.push('^');
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');
    Regex::new(&pattern)
}

/// Ordered keep/drop rules with a default for unmatched products
#[derive(Debug, Clone)]
pub struct ProductSelectorRules {
    rules: Vec<Rule>,
    default_polarity: Polarity,
}

impl ProductSelectorRules {
    /// Compile `commands`. With no rules every descriptor gets `default_polarity`.
    pub fn new(commands: &[String], default_polarity: Polarity) -> Result<Self, ConfigurationError> {
        let rules = commands
            .iter()
            .map(|c| Rule::parse(c))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            rules,
            default_polarity,
        })
    }

    /// Decide whether `desc` is kept: every matching rule overrides the previous decision
    pub fn select(&self, desc: &ProductDescriptor) -> bool {
        self.rules
            .iter()
            .fold(self.default_polarity.keeps(), |selected, rule| {
                if rule.matches(desc) {
                    rule.polarity.keeps()
                } else {
                    selected
                }
            })
    }

    /// The rule that decides `desc`, if any rule matches it
    pub fn deciding_rule(&self, desc: &ProductDescriptor) -> Option<&str> {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.matches(desc))
            .map(|rule| rule.text.as_str())
    }

    pub fn default_polarity(&self) -> Polarity {
        self.default_polarity
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

/// Per-descriptor outcome of product selection
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SelectionDecision {
    pub keep: bool,
    /// Dropped by this job, as opposed to absent upstream or transient
    pub newly_dropped: bool,
}

/// Descriptors selected for output, one ordered list per branch type
#[derive(Clone, Debug, Default)]
pub struct KeptProducts {
    per_type: [Vec<Arc<ProductDescriptor>>; BranchType::COUNT],
}

impl KeptProducts {
    pub fn get(&self, branch_type: BranchType) -> &[Arc<ProductDescriptor>] {
        &self.per_type[branch_type.index()]
    }

    pub fn contains(&self, branch_type: BranchType, branch_id: BranchId) -> bool {
        self.get(branch_type)
            .iter()
            .any(|d| d.branch_id == branch_id)
    }

    pub fn branch_names(&self, branch_type: BranchType) -> Vec<String> {
        self.get(branch_type)
            .iter()
            .map(|d| d.branch_name())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.per_type.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn push(&mut self, desc: Arc<ProductDescriptor>) {
        self.per_type[desc.branch_type.index()].push(desc);
    }
}

/// The frozen result of applying [`ProductSelectorRules`] to a catalog
#[derive(Clone, Debug, Default)]
pub struct ProductSelection {
    decisions: BTreeMap<BranchId, SelectionDecision>,
    kept: KeptProducts,
    has_newly_dropped_branch: [bool; BranchType::COUNT],
    aliases: AliasTable,
}

impl ProductSelection {
    /// Walk the catalog once and decide every descriptor.
    ///
    /// Transient products and products already dropped upstream are neither
    /// kept nor counted as newly dropped. Two kept products of this process
    /// that resolve to the same underlying product are a configuration error.
    pub fn compute(
        rules: &ProductSelectorRules,
        catalog: &ProductCatalog,
    ) -> Result<Self, ConfigurationError> {
        let mut ordered: Vec<&Arc<ProductDescriptor>> = catalog.iter().collect();
        ordered.sort_by_cached_key(|d| (d.branch_type, d.branch_name()));

        let mut selection = ProductSelection::default();
        let mut original_to_kept: BTreeMap<BranchId, Arc<ProductDescriptor>> = BTreeMap::new();

        for desc in ordered {
            let decision = if desc.transient || desc.is_dropped_upstream() {
                SelectionDecision::default()
            } else if rules.select(desc) {
                if desc.produced {
                    if let Some(existing) = original_to_kept.get(&desc.original_branch_id) {
                        return Err(ConfigurationError::DuplicateOutputSelection {
                            first: desc.branch_name(),
                            second: existing.branch_name(),
                        });
                    }
                    original_to_kept.insert(desc.original_branch_id, Arc::clone(desc));
                }
                log::debug!(
                    "keeping {} ({})",
                    desc.branch_name(),
                    rules.deciding_rule(desc).unwrap_or("default")
                );
                selection.kept.push(Arc::clone(desc));
                SelectionDecision {
                    keep: true,
                    newly_dropped: false,
                }
            } else {
                selection.has_newly_dropped_branch[desc.branch_type.index()] = true;
                SelectionDecision {
                    keep: false,
                    newly_dropped: true,
                }
            };
            selection.decisions.insert(desc.branch_id, decision);
        }

        selection.aliases = AliasTable::build(catalog, &original_to_kept, &selection.decisions);
        Ok(selection)
    }

    pub fn decision(&self, branch_id: BranchId) -> Option<SelectionDecision> {
        self.decisions.get(&branch_id).copied()
    }

    pub fn is_kept(&self, branch_id: BranchId) -> bool {
        self.decision(branch_id).is_some_and(|d| d.keep)
    }

    pub fn kept_products(&self) -> &KeptProducts {
        &self.kept
    }

    pub fn has_newly_dropped_branch(&self) -> &[bool; BranchType::COUNT] {
        &self.has_newly_dropped_branch
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }
}
