// queryground-core/src/engine/pipeline.rs
// Aggregation pipeline execution

use std::cmp::Ordering;

use crate::engine::filter::matches_filter;
use crate::error::{Result, SandboxError};
use crate::extjson::ExtValue;
use crate::value_utils::{compare_values, get_nested_value};

/// A parsed aggregation pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
enum Stage {
    Match(ExtValue),
    Project(Vec<(String, ProjectField)>),
    Group {
        id: GroupId,
        accumulators: Vec<(String, Accumulator)>,
    },
    Sort(Vec<(String, SortDirection)>),
    Skip(usize),
    Limit(usize),
    Count(String),
}

#[derive(Debug, Clone)]
pub enum ProjectField {
    Include,
    Exclude,
    Rename(String),
}

#[derive(Debug, Clone)]
enum GroupId {
    Field(String),
    Null,
}

#[derive(Debug, Clone)]
enum Accumulator {
    SumConstant(i64),
    SumField(String),
    Avg(String),
    Min(String),
    Max(String),
    First(String),
    Last(String),
}

#[derive(Debug, Clone, Copy)]
enum SortDirection {
    Ascending,
    Descending,
}

impl Pipeline {
    /// Parse the ordered stage list of an aggregate() call. `$out` and
    /// `$merge` must have been removed by the sanitizer before this
    /// point; they are rejected here as a second line of defense.
    pub fn parse(stages: &[ExtValue]) -> Result<Pipeline> {
        let mut parsed = Vec::with_capacity(stages.len());
        for stage in stages {
            let entries = stage.as_object().ok_or_else(|| {
                SandboxError::Execution("each pipeline stage must be a document".to_string())
            })?;
            if entries.is_empty() {
                continue;
            }
            let (name, body) = &entries[0];
            parsed.push(Self::parse_stage(name, body)?);
        }
        Ok(Pipeline { stages: parsed })
    }

    fn parse_stage(name: &str, body: &ExtValue) -> Result<Stage> {
        match name {
            "$match" => Ok(Stage::Match(body.clone())),
            "$project" => Ok(Stage::Project(parse_projection(body)?)),
            "$group" => parse_group(body),
            "$sort" => Ok(Stage::Sort(parse_sort(body)?)),
            "$skip" => Ok(Stage::Skip(positive_int(body, "$skip")?)),
            "$limit" => Ok(Stage::Limit(positive_int(body, "$limit")?)),
            "$count" => match body {
                ExtValue::String(field) if !field.is_empty() => {
                    Ok(Stage::Count(field.clone()))
                }
                _ => Err(SandboxError::Execution(
                    "$count requires a non-empty string".to_string(),
                )),
            },
            other => Err(SandboxError::Execution(format!(
                "Unrecognized pipeline stage name: '{}'",
                other
            ))),
        }
    }

    /// Run every stage in order over the input documents
    pub fn run(&self, mut docs: Vec<ExtValue>) -> Result<Vec<ExtValue>> {
        for stage in &self.stages {
            docs = match stage {
                Stage::Match(filter) => {
                    let mut kept = Vec::new();
                    for doc in docs {
                        if matches_filter(&doc, filter)? {
                            kept.push(doc);
                        }
                    }
                    kept
                }
                Stage::Project(fields) => docs
                    .into_iter()
                    .map(|doc| project_document(&doc, fields))
                    .collect(),
                Stage::Group { id, accumulators } => run_group(docs, id, accumulators)?,
                Stage::Sort(fields) => {
                    docs.sort_by(|a, b| {
                        for (field, direction) in fields {
                            let va = get_nested_value(a, field).unwrap_or(&ExtValue::Null);
                            let vb = get_nested_value(b, field).unwrap_or(&ExtValue::Null);
                            let ord = match direction {
                                SortDirection::Ascending => compare_values(va, vb),
                                SortDirection::Descending => compare_values(vb, va),
                            };
                            if ord != Ordering::Equal {
                                return ord;
                            }
                        }
                        Ordering::Equal
                    });
                    docs
                }
                Stage::Skip(n) => docs.into_iter().skip(*n).collect(),
                Stage::Limit(n) => docs.into_iter().take(*n).collect(),
                Stage::Count(field) => {
                    let count = docs.len() as i64;
                    vec![ExtValue::Object(vec![(
                        field.clone(),
                        ExtValue::Int64(count),
                    )])]
                }
            };
        }
        Ok(docs)
    }
}

// ============================================================================
// $project
// ============================================================================

fn parse_projection(body: &ExtValue) -> Result<Vec<(String, ProjectField)>> {
    let entries = body.as_object().ok_or_else(|| {
        SandboxError::Execution("$project requires a document".to_string())
    })?;
    let mut fields = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let field = match value {
            ExtValue::String(s) if s.starts_with('$') => {
                ProjectField::Rename(s.trim_start_matches('$').to_string())
            }
            v => match v.as_i64() {
                Some(0) => ProjectField::Exclude,
                Some(_) => ProjectField::Include,
                None => match v.as_bool() {
                    Some(true) => ProjectField::Include,
                    Some(false) => ProjectField::Exclude,
                    None => {
                        return Err(SandboxError::Execution(format!(
                            "unsupported $project expression for field '{}'",
                            key
                        )))
                    }
                },
            },
        };
        fields.push((key.clone(), field));
    }
    Ok(fields)
}

/// Shared by $project and find() projections
pub fn project_document(doc: &ExtValue, fields: &[(String, ProjectField)]) -> ExtValue {
    let has_inclusion = fields
        .iter()
        .any(|(k, f)| k != "_id" && matches!(f, ProjectField::Include | ProjectField::Rename(_)));

    if has_inclusion {
        let mut out: Vec<(String, ExtValue)> = Vec::new();
        // _id is kept unless excluded explicitly
        let id_excluded = fields
            .iter()
            .any(|(k, f)| k == "_id" && matches!(f, ProjectField::Exclude));
        if !id_excluded {
            if let Some(id) = doc.get("_id") {
                out.push(("_id".to_string(), id.clone()));
            }
        }
        for (key, field) in fields {
            if key == "_id" {
                continue;
            }
            match field {
                ProjectField::Include => {
                    if let Some(v) = get_nested_value(doc, key) {
                        out.push((key.clone(), v.clone()));
                    }
                }
                ProjectField::Rename(source) => {
                    if let Some(v) = get_nested_value(doc, source) {
                        out.push((key.clone(), v.clone()));
                    }
                }
                ProjectField::Exclude => {}
            }
        }
        ExtValue::Object(out)
    } else {
        // pure exclusion projection: copy everything but the named fields
        let mut out = doc.clone();
        for (key, field) in fields {
            if matches!(field, ProjectField::Exclude) {
                out.remove(key);
            }
        }
        out
    }
}

/// Build a projection spec from the second positional argument of a
/// find() call. An empty document means "no projection".
pub fn parse_find_projection(spec: &ExtValue) -> Result<Option<Vec<(String, ProjectField)>>> {
    match spec.as_object() {
        Some([]) => Ok(None),
        Some(_) => Ok(Some(parse_projection(spec)?)),
        None => Err(SandboxError::Execution(
            "projection must be a document".to_string(),
        )),
    }
}

// ============================================================================
// $group
// ============================================================================

fn parse_group(body: &ExtValue) -> Result<Stage> {
    let entries = body.as_object().ok_or_else(|| {
        SandboxError::Execution("$group requires a document".to_string())
    })?;

    let mut id = None;
    let mut accumulators = Vec::new();

    for (key, value) in entries {
        if key == "_id" {
            id = Some(match value {
                ExtValue::Null => GroupId::Null,
                ExtValue::String(s) if s.starts_with('$') => {
                    GroupId::Field(s.trim_start_matches('$').to_string())
                }
                other => {
                    return Err(SandboxError::Execution(format!(
                        "unsupported $group _id expression: {}",
                        other.type_name()
                    )))
                }
            });
        } else {
            accumulators.push((key.clone(), parse_accumulator(value)?));
        }
    }

    let id = id.ok_or_else(|| {
        SandboxError::Execution("a $group specification must include an _id".to_string())
    })?;
    Ok(Stage::Group { id, accumulators })
}

fn parse_accumulator(value: &ExtValue) -> Result<Accumulator> {
    let entries = value.as_object().ok_or_else(|| {
        SandboxError::Execution("accumulator must be a document".to_string())
    })?;
    if entries.len() != 1 {
        return Err(SandboxError::Execution(
            "accumulator must hold exactly one operator".to_string(),
        ));
    }
    let (op, operand) = &entries[0];
    match op.as_str() {
        "$sum" => match operand {
            ExtValue::String(s) if s.starts_with('$') => {
                Ok(Accumulator::SumField(s.trim_start_matches('$').to_string()))
            }
            v => match v.as_i64() {
                Some(n) => Ok(Accumulator::SumConstant(n)),
                None => Err(SandboxError::Execution(
                    "$sum requires a constant or a field reference".to_string(),
                )),
            },
        },
        "$avg" => Ok(Accumulator::Avg(field_reference(operand, "$avg")?)),
        "$min" => Ok(Accumulator::Min(field_reference(operand, "$min")?)),
        "$max" => Ok(Accumulator::Max(field_reference(operand, "$max")?)),
        "$first" => Ok(Accumulator::First(field_reference(operand, "$first")?)),
        "$last" => Ok(Accumulator::Last(field_reference(operand, "$last")?)),
        other => Err(SandboxError::Execution(format!(
            "unknown accumulator: {}",
            other
        ))),
    }
}

fn field_reference(value: &ExtValue, op: &str) -> Result<String> {
    match value {
        ExtValue::String(s) if s.starts_with('$') => Ok(s.trim_start_matches('$').to_string()),
        _ => Err(SandboxError::Execution(format!(
            "{} requires a field reference starting with $",
            op
        ))),
    }
}

fn run_group(
    docs: Vec<ExtValue>,
    id: &GroupId,
    accumulators: &[(String, Accumulator)],
) -> Result<Vec<ExtValue>> {
    // group keys keep first-seen order so output is deterministic
    let mut keys: Vec<ExtValue> = Vec::new();
    let mut buckets: Vec<Vec<ExtValue>> = Vec::new();

    for doc in docs {
        let key = match id {
            GroupId::Null => ExtValue::Null,
            GroupId::Field(field) => get_nested_value(&doc, field)
                .cloned()
                .unwrap_or(ExtValue::Null),
        };
        match keys.iter().position(|k| k == &key) {
            Some(pos) => buckets[pos].push(doc),
            None => {
                keys.push(key);
                buckets.push(vec![doc]);
            }
        }
    }

    let mut out = Vec::with_capacity(keys.len());
    for (key, bucket) in keys.into_iter().zip(buckets) {
        let mut entries = vec![("_id".to_string(), key)];
        for (name, acc) in accumulators {
            entries.push((name.clone(), apply_accumulator(acc, &bucket)));
        }
        out.push(ExtValue::Object(entries));
    }
    Ok(out)
}

fn apply_accumulator(acc: &Accumulator, docs: &[ExtValue]) -> ExtValue {
    match acc {
        Accumulator::SumConstant(n) => ExtValue::Int64(n * docs.len() as i64),
        Accumulator::SumField(field) => {
            let total: f64 = numeric_values(docs, field).sum();
            number(total)
        }
        Accumulator::Avg(field) => {
            let values: Vec<f64> = numeric_values(docs, field).collect();
            if values.is_empty() {
                ExtValue::Null
            } else {
                ExtValue::Double(values.iter().sum::<f64>() / values.len() as f64)
            }
        }
        Accumulator::Min(field) => extremum(docs, field, Ordering::Less),
        Accumulator::Max(field) => extremum(docs, field, Ordering::Greater),
        Accumulator::First(field) => docs
            .first()
            .and_then(|d| get_nested_value(d, field).cloned())
            .unwrap_or(ExtValue::Null),
        Accumulator::Last(field) => docs
            .last()
            .and_then(|d| get_nested_value(d, field).cloned())
            .unwrap_or(ExtValue::Null),
    }
}

fn numeric_values<'a>(docs: &'a [ExtValue], field: &'a str) -> impl Iterator<Item = f64> + 'a {
    docs.iter()
        .filter_map(move |doc| get_nested_value(doc, field).and_then(|v| v.as_f64()))
}

fn extremum(docs: &[ExtValue], field: &str, wanted: Ordering) -> ExtValue {
    let mut best: Option<&ExtValue> = None;
    for doc in docs {
        if let Some(v) = get_nested_value(doc, field) {
            best = match best {
                None => Some(v),
                Some(b) if compare_values(v, b) == wanted => Some(v),
                keep => keep,
            };
        }
    }
    best.cloned().unwrap_or(ExtValue::Null)
}

/// Render a float without a trailing `.0` when it is integral
fn number(n: f64) -> ExtValue {
    if n.fract() == 0.0 && n.abs() < (1i64 << 53) as f64 {
        ExtValue::Int64(n as i64)
    } else {
        ExtValue::Double(n)
    }
}

// ============================================================================
// $sort / $skip / $limit helpers
// ============================================================================

fn parse_sort(body: &ExtValue) -> Result<Vec<(String, SortDirection)>> {
    let entries = body.as_object().ok_or_else(|| {
        SandboxError::Execution("$sort requires a document".to_string())
    })?;
    let mut fields = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let direction = match value.as_i64() {
            Some(1) => SortDirection::Ascending,
            Some(-1) => SortDirection::Descending,
            _ => {
                return Err(SandboxError::Execution(format!(
                    "$sort direction for '{}' must be 1 or -1",
                    key
                )))
            }
        };
        fields.push((key.clone(), direction));
    }
    Ok(fields)
}

fn positive_int(value: &ExtValue, stage: &str) -> Result<usize> {
    match value.as_i64() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(SandboxError::Execution(format!(
            "{} requires a positive integer",
            stage
        ))),
    }
}
