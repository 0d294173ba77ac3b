use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobMatcher};
use tracing::{debug, info};

use crate::error::ValidationError;
use crate::model::{
    ActionKind, ConditionKind, ConditionOperator, ConditionValue, FileRecord, OperationOrigin,
    OrganizationOperation, OrganizationRule, RuleAction, RuleScope,
};
use crate::paths;

#[derive(Debug)]
enum Compare {
    Equals(u64),
    GreaterThan(u64),
    LessThan(u64),
    Between(u64, u64),
}

impl Compare {
    fn holds(&self, value: u64) -> bool {
        match *self {
            Compare::Equals(expected) => value == expected,
            Compare::GreaterThan(bound) => value > bound,
            Compare::LessThan(bound) => value < bound,
            Compare::Between(min, max) => value >= min && value <= max,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum TextTarget {
    Extension,
    Name,
    Path,
}

#[derive(Debug)]
enum Predicate {
    ExtensionSet {
        extensions: BTreeSet<String>,
        case_sensitive: bool,
    },
    Equals {
        target: TextTarget,
        expected: String,
        case_sensitive: bool,
    },
    Contains {
        target: TextTarget,
        needle: String,
        case_sensitive: bool,
    },
    Glob {
        target: TextTarget,
        matcher: GlobMatcher,
    },
    Size(Compare),
    AgeDays(Compare),
}

#[derive(Debug)]
struct CompiledRule {
    rule: OrganizationRule,
    predicate: Predicate,
}

/// Enabled rules compiled once and evaluated in priority order.
#[derive(Debug)]
pub struct RuleEngine {
    rules: Vec<CompiledRule>,
}

impl RuleEngine {
    /// Compiles every enabled rule. Rules with equal priority keep their
    /// input order.
    pub fn new(rules: &[OrganizationRule]) -> Result<Self, ValidationError> {
        let mut enabled = rules
            .iter()
            .filter(|rule| rule.enabled)
            .cloned()
            .collect::<Vec<_>>();
        enabled.sort_by_key(|rule| rule.priority);

        let mut compiled = Vec::with_capacity(enabled.len());
        for rule in enabled {
            validate_action(&rule)?;
            let predicate = compile_condition(&rule)?;
            compiled.push(CompiledRule { rule, predicate });
        }
        Ok(Self { rules: compiled })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Produces at most one candidate operation per file. The first rule
    /// whose scope and condition match claims the file, even when its action
    /// turns out to be a no-op.
    pub fn evaluate(&self, records: &[FileRecord], now: DateTime<Utc>) -> Vec<OrganizationOperation> {
        let mut operations = Vec::new();
        for record in records.iter().filter(|record| !record.is_directory) {
            let Some(compiled) = self
                .rules
                .iter()
                .find(|compiled| compiled.matches(record, now))
            else {
                continue;
            };
            match compiled.operation_for(record, now) {
                Some(operation) => operations.push(operation),
                None => debug!(
                    "rule {} leaves {} in place",
                    compiled.rule.id,
                    record.path.display()
                ),
            }
        }
        info!(
            "rule evaluation: {} rule(s), {} record(s), {} candidate operation(s)",
            self.rules.len(),
            records.len(),
            operations.len()
        );
        operations
    }
}

impl CompiledRule {
    fn matches(&self, record: &FileRecord, now: DateTime<Utc>) -> bool {
        in_scope(&self.rule.scope, &record.path) && self.predicate.holds(record, now)
    }

    fn operation_for(&self, record: &FileRecord, now: DateTime<Utc>) -> Option<OrganizationOperation> {
        let action = &self.rule.action;
        let source = record.path.clone();
        let operation = match action.kind {
            ActionKind::Delete => OrganizationOperation::delete(source),
            ActionKind::Move | ActionKind::Copy => {
                let template = action.destination.as_deref()?;
                let target = placement_target(template, record, now);
                if action.kind == ActionKind::Move {
                    OrganizationOperation::move_to(source, target)
                } else {
                    OrganizationOperation::copy_to(source, target)
                }
            }
            ActionKind::Rename => {
                let template = action
                    .pattern
                    .as_deref()
                    .or(action.destination.as_deref())?;
                let name = expand_tokens(template, record, now);
                let target = match paths::parent(&record.path) {
                    Some(dir) => dir.join(name),
                    None => PathBuf::from(name),
                };
                OrganizationOperation::rename_to(source, target)
            }
        };

        if let Some(destination) = operation.destination_path() {
            if paths::path_key(destination) == paths::path_key(&record.path) {
                return None;
            }
        }
        Some(
            operation
                .with_origin(OperationOrigin::Rule {
                    rule_id: self.rule.id.clone(),
                })
                .with_size(record.size_bytes),
        )
    }
}

impl Predicate {
    fn holds(&self, record: &FileRecord, now: DateTime<Utc>) -> bool {
        match self {
            Predicate::ExtensionSet {
                extensions,
                case_sensitive,
            } => {
                let Some(ext) = text_of(TextTarget::Extension, &record.path) else {
                    return false;
                };
                let ext = fold(&ext, *case_sensitive);
                extensions.contains(&ext)
            }
            Predicate::Equals {
                target,
                expected,
                case_sensitive,
            } => text_of(*target, &record.path)
                .is_some_and(|text| fold(&text, *case_sensitive) == *expected),
            Predicate::Contains {
                target,
                needle,
                case_sensitive,
            } => text_of(*target, &record.path)
                .is_some_and(|text| fold(&text, *case_sensitive).contains(needle.as_str())),
            Predicate::Glob { target, matcher } => {
                text_of(*target, &record.path).is_some_and(|text| matcher.is_match(text))
            }
            Predicate::Size(compare) => compare.holds(record.size_bytes),
            Predicate::AgeDays(compare) => {
                age_days(record, now).is_some_and(|days| compare.holds(days))
            }
        }
    }
}

fn fold(text: &str, case_sensitive: bool) -> String {
    if case_sensitive {
        text.to_string()
    } else {
        text.to_lowercase()
    }
}

fn text_of(target: TextTarget, path: &Path) -> Option<String> {
    match target {
        TextTarget::Extension => {
            let name = paths::file_name(path);
            paths::split_name(&name).1.map(str::to_string)
        }
        TextTarget::Name => Some(paths::file_name(path)),
        TextTarget::Path => Some(path.to_string_lossy().replace('\\', "/")),
    }
}

/// Days since last modification, falling back to creation time.
fn age_days(record: &FileRecord, now: DateTime<Utc>) -> Option<u64> {
    let stamp = record.modified.or(record.created)?;
    let days = (now - stamp).num_days();
    Some(days.max(0) as u64)
}

fn in_scope(scope: &RuleScope, path: &Path) -> bool {
    if scope.paths.is_empty() {
        return scope.include_hidden || !paths::is_hidden(path);
    }
    scope.paths.iter().any(|root| {
        let Some(below) = paths::relative_to(root, path) else {
            return false;
        };
        if below.is_empty() {
            return false;
        }
        if !scope.recursive && below.len() != 1 {
            return false;
        }
        scope.include_hidden || !below.iter().any(|segment| segment.starts_with('.'))
    })
}

fn validate_action(rule: &OrganizationRule) -> Result<(), ValidationError> {
    let RuleAction {
        kind,
        destination,
        pattern,
    } = &rule.action;
    let missing = match kind {
        ActionKind::Move | ActionKind::Copy => destination.as_deref().map_or(true, str::is_empty),
        ActionKind::Rename => pattern
            .as_deref()
            .or(destination.as_deref())
            .map_or(true, str::is_empty),
        ActionKind::Delete => false,
    };
    if missing {
        return Err(ValidationError::InvalidRule {
            rule_id: rule.id.clone(),
            reason: format!("{kind:?} action needs a destination or pattern"),
        });
    }
    Ok(())
}

fn compile_condition(rule: &OrganizationRule) -> Result<Predicate, ValidationError> {
    let condition = &rule.condition;
    let case_sensitive = condition.case_sensitive;
    let invalid = |reason: String| ValidationError::InvalidRule {
        rule_id: rule.id.clone(),
        reason,
    };

    match condition.kind {
        ConditionKind::Size | ConditionKind::Age => {
            let compare = match (condition.operator, &condition.value) {
                (ConditionOperator::Equals, ConditionValue::Number(n)) => Compare::Equals(*n),
                (ConditionOperator::GreaterThan, ConditionValue::Number(n)) => {
                    Compare::GreaterThan(*n)
                }
                (ConditionOperator::LessThan, ConditionValue::Number(n)) => Compare::LessThan(*n),
                (ConditionOperator::Between, ConditionValue::Range { min, max }) if min <= max => {
                    Compare::Between(*min, *max)
                }
                (operator, value) => {
                    return Err(invalid(format!(
                        "{:?} condition cannot use {operator:?} with {value:?}",
                        condition.kind
                    )))
                }
            };
            Ok(if condition.kind == ConditionKind::Size {
                Predicate::Size(compare)
            } else {
                Predicate::AgeDays(compare)
            })
        }
        ConditionKind::Extension | ConditionKind::Pattern => {
            let ConditionValue::Text(text) = &condition.value else {
                return Err(invalid(format!(
                    "{:?} condition needs a text value",
                    condition.kind
                )));
            };
            let target = if condition.kind == ConditionKind::Extension {
                TextTarget::Extension
            } else if text.contains(['/', '\\']) {
                TextTarget::Path
            } else {
                TextTarget::Name
            };
            match condition.operator {
                ConditionOperator::Equals if condition.kind == ConditionKind::Extension => {
                    let extensions = text
                        .split(['|', ','])
                        .map(|ext| ext.trim().trim_start_matches('.'))
                        .filter(|ext| !ext.is_empty())
                        .map(|ext| fold(ext, case_sensitive))
                        .collect::<BTreeSet<_>>();
                    if extensions.is_empty() {
                        return Err(invalid("extension list is empty".to_string()));
                    }
                    Ok(Predicate::ExtensionSet {
                        extensions,
                        case_sensitive,
                    })
                }
                ConditionOperator::Equals => Ok(Predicate::Equals {
                    target,
                    expected: fold(text, case_sensitive),
                    case_sensitive,
                }),
                ConditionOperator::Contains => Ok(Predicate::Contains {
                    target,
                    needle: fold(text, case_sensitive),
                    case_sensitive,
                }),
                ConditionOperator::Matches => {
                    let glob_source = text.replace('\\', "/");
                    let matcher = GlobBuilder::new(&glob_source)
                        .case_insensitive(!case_sensitive)
                        .build()
                        .map_err(|err| ValidationError::InvalidPattern {
                            rule_id: rule.id.clone(),
                            pattern: text.clone(),
                            reason: err.to_string(),
                        })?
                        .compile_matcher();
                    Ok(Predicate::Glob { target, matcher })
                }
                operator => Err(invalid(format!(
                    "{:?} condition cannot use {operator:?}",
                    condition.kind
                ))),
            }
        }
    }
}

/// Resolves a move/copy destination. A template naming `{name}` or `{stem}`
/// is the full target path; otherwise it is the directory receiving the file.
fn placement_target(template: &str, record: &FileRecord, now: DateTime<Utc>) -> PathBuf {
    let expanded = PathBuf::from(expand_tokens(template, record, now));
    if template.contains("{name}") || template.contains("{stem}") {
        expanded
    } else {
        expanded.join(paths::file_name(&record.path))
    }
}

fn expand_tokens(template: &str, record: &FileRecord, now: DateTime<Utc>) -> String {
    let name = paths::file_name(&record.path);
    let (stem, ext) = paths::split_name(&name);
    let stamp = record.modified.or(record.created).unwrap_or(now);
    template
        .replace("{name}", &name)
        .replace("{stem}", stem)
        .replace("{ext}", ext.unwrap_or_default())
        .replace("{year}", &stamp.format("%Y").to_string())
        .replace("{month}", &stamp.format("%m").to_string())
}

#[cfg(test)]
mod tests {
    use std::path::{Path, PathBuf};

    use chrono::{Duration, TimeZone, Utc};

    use super::RuleEngine;
    use crate::error::ValidationError;
    use crate::model::{
        ActionKind, ConditionKind, ConditionOperator, ConditionValue, FileRecord, OperationKind,
        OperationOrigin, OrganizationRule, RuleAction, RuleCondition, RuleScope,
    };

    fn rule(
        id: &str,
        priority: i32,
        kind: ConditionKind,
        operator: ConditionOperator,
        value: ConditionValue,
        action: RuleAction,
    ) -> OrganizationRule {
        OrganizationRule {
            id: id.to_string(),
            name: id.to_string(),
            enabled: true,
            priority,
            condition: RuleCondition {
                kind,
                operator,
                value,
                case_sensitive: false,
            },
            action,
            scope: RuleScope::default(),
        }
    }

    fn move_to(dir: &str) -> RuleAction {
        RuleAction {
            kind: ActionKind::Move,
            destination: Some(dir.to_string()),
            pattern: None,
        }
    }

    fn text(value: &str) -> ConditionValue {
        ConditionValue::Text(value.to_string())
    }

    #[test]
    fn extension_alternation_is_matched_as_a_set() {
        let engine = RuleEngine::new(&[rule(
            "images",
            1,
            ConditionKind::Extension,
            ConditionOperator::Equals,
            text("jpg|jpeg|png"),
            move_to("/sorted/images"),
        )])
        .expect("valid rule");

        let records = vec![
            FileRecord::new("/in/a.JPG", 10),
            FileRecord::new("/in/b.jpeg", 10),
            FileRecord::new("/in/c.pngx", 10),
            FileRecord::new("/in/d", 10),
        ];
        let ops = engine.evaluate(&records, Utc::now());
        let sources = ops.iter().map(|op| op.source.clone()).collect::<Vec<_>>();
        assert_eq!(
            sources,
            vec![PathBuf::from("/in/a.JPG"), PathBuf::from("/in/b.jpeg")]
        );
        assert_eq!(
            ops[0].destination.as_deref(),
            Some(Path::new("/sorted/images/a.JPG"))
        );
        assert_eq!(ops[0].size_bytes, 10);
        assert_eq!(
            ops[0].origin,
            OperationOrigin::Rule {
                rule_id: "images".to_string()
            }
        );
    }

    #[test]
    fn first_matching_rule_by_priority_claims_the_file() {
        let mut disabled = rule(
            "disabled",
            0,
            ConditionKind::Pattern,
            ConditionOperator::Matches,
            text("*"),
            RuleAction {
                kind: ActionKind::Delete,
                destination: None,
                pattern: None,
            },
        );
        disabled.enabled = false;
        let rules = vec![
            rule(
                "big",
                5,
                ConditionKind::Size,
                ConditionOperator::GreaterThan,
                ConditionValue::Number(100),
                move_to("/big"),
            ),
            rule(
                "pdf",
                1,
                ConditionKind::Extension,
                ConditionOperator::Equals,
                text("pdf"),
                move_to("/docs"),
            ),
            disabled,
        ];
        let engine = RuleEngine::new(&rules).expect("valid rules");
        assert_eq!(engine.len(), 2);

        let records = vec![
            FileRecord::new("/in/large.pdf", 500),
            FileRecord::new("/in/large.iso", 500),
        ];
        let ops = engine.evaluate(&records, Utc::now());
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].destination.as_deref(), Some(Path::new("/docs/large.pdf")));
        assert_eq!(ops[1].destination.as_deref(), Some(Path::new("/big/large.iso")));
    }

    #[test]
    fn size_between_and_age_conditions() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let engine = RuleEngine::new(&[
            rule(
                "mid",
                1,
                ConditionKind::Size,
                ConditionOperator::Between,
                ConditionValue::Range { min: 10, max: 20 },
                move_to("/mid"),
            ),
            rule(
                "stale",
                2,
                ConditionKind::Age,
                ConditionOperator::GreaterThan,
                ConditionValue::Number(365),
                move_to("/archive/{year}"),
            ),
        ])
        .expect("valid rules");

        let records = vec![
            FileRecord::new("/in/mid.bin", 15),
            FileRecord::new("/in/old.txt", 1).with_modified(now - Duration::days(400)),
            FileRecord::new("/in/new.txt", 1).with_modified(now - Duration::days(3)),
            FileRecord::new("/in/unknown.txt", 1),
        ];
        let ops = engine.evaluate(&records, now);
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].destination.as_deref(), Some(Path::new("/mid/mid.bin")));
        assert_eq!(
            ops[1].destination.as_deref(),
            Some(Path::new("/archive/2023/old.txt"))
        );
    }

    #[test]
    fn scope_limits_depth_and_hidden_entries() {
        let mut scoped = rule(
            "txt",
            1,
            ConditionKind::Extension,
            ConditionOperator::Equals,
            text("txt"),
            RuleAction {
                kind: ActionKind::Delete,
                destination: None,
                pattern: None,
            },
        );
        scoped.scope = RuleScope {
            paths: vec![PathBuf::from("/home/u")],
            recursive: false,
            include_hidden: false,
        };
        let engine = RuleEngine::new(&[scoped]).expect("valid rule");
        let records = vec![
            FileRecord::new("/home/u/top.txt", 1),
            FileRecord::new("/home/u/nested/deep.txt", 1),
            FileRecord::new("/home/u/.secret.txt", 1),
            FileRecord::new("/elsewhere/top.txt", 1),
        ];
        let ops = engine.evaluate(&records, Utc::now());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Delete);
        assert_eq!(ops[0].source, PathBuf::from("/home/u/top.txt"));
    }

    #[test]
    fn rename_pattern_expands_tokens_next_to_source() {
        let stamp = Utc.with_ymd_and_hms(2022, 3, 9, 0, 0, 0).unwrap();
        let engine = RuleEngine::new(&[rule(
            "photos",
            1,
            ConditionKind::Pattern,
            ConditionOperator::Matches,
            text("IMG_*"),
            RuleAction {
                kind: ActionKind::Rename,
                destination: None,
                pattern: Some("{year}-{month} {stem}.{ext}".to_string()),
            },
        )])
        .expect("valid rule");
        let records = vec![
            FileRecord::new("/pics/img_0001.jpg", 1).with_created(stamp),
            FileRecord::new("/pics/2022-03 img_0001.jpg", 1).with_created(stamp),
        ];
        let ops = engine.evaluate(&records, Utc::now());
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].kind, OperationKind::Rename);
        assert_eq!(
            ops[0].destination.as_deref(),
            Some(Path::new("/pics/2022-03 img_0001.jpg"))
        );
    }

    #[test]
    fn malformed_rules_are_rejected_up_front() {
        let bad_glob = rule(
            "glob",
            1,
            ConditionKind::Pattern,
            ConditionOperator::Matches,
            text("a[b"),
            move_to("/x"),
        );
        assert!(matches!(
            RuleEngine::new(&[bad_glob]),
            Err(ValidationError::InvalidPattern { .. })
        ));

        let no_destination = rule(
            "move",
            1,
            ConditionKind::Extension,
            ConditionOperator::Equals,
            text("txt"),
            RuleAction {
                kind: ActionKind::Move,
                destination: None,
                pattern: None,
            },
        );
        assert!(matches!(
            RuleEngine::new(&[no_destination]),
            Err(ValidationError::InvalidRule { .. })
        ));

        let wrong_value = rule(
            "size",
            1,
            ConditionKind::Size,
            ConditionOperator::Contains,
            ConditionValue::Number(1),
            move_to("/x"),
        );
        assert!(RuleEngine::new(&[wrong_value]).is_err());
    }
}
