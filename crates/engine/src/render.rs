//! Statement rendering
//!
//! Turns a plan's [`DbQuery`] into one or more [`NativeQuery`]s: arguments
//! are evaluated against the environment, template fragments are expanded
//! into backend placeholders, and every argument is encoded through the
//! value codec before anything reaches the driver.
//!
//! ## Chunking
//!
//! A chunkable template whose flattened parameter count exceeds the
//! backend's bind limit is split on its largest tuple (or tuple list)
//! fragment. Every other parameter is repeated in each chunk. Results of the
//! chunks are merged by the interpreter.

use sluice_core::{ArgType, Error, Result, Value};
use sluice_driver::codec::encode;
use sluice_driver::NativeQuery;

use crate::environment::Environment;
use crate::generators::GeneratorSnapshot;
use crate::plan::{Arg, DbQuery, Fragment, PlaceholderFormat};

/// Evaluate a plan argument to a value
pub fn evaluate_arg(arg: &Arg, env: &Environment, generators: &GeneratorSnapshot) -> Result<Value> {
    match arg {
        Arg::Literal(value) => Ok(value.clone()),
        Arg::Placeholder { name } => env.resolve(name).cloned(),
        Arg::Generator { name, args } => {
            let args = args
                .iter()
                .map(|a| evaluate_arg(a, env, generators))
                .collect::<Result<Vec<_>>>()?;
            generators.generate(name, &args)
        }
        Arg::List(items) => items
            .iter()
            .map(|a| evaluate_arg(a, env, generators))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        Arg::Record(fields) => fields
            .iter()
            .map(|(k, a)| Ok((k.clone(), evaluate_arg(a, env, generators)?)))
            .collect::<Result<_>>()
            .map(Value::Record),
    }
}

/// Render a statement into driver queries
///
/// Returns more than one query only when a chunkable template had to be
/// split to respect `max_bind_values`.
///
/// # Errors
///
/// - `PlanBinding` for unresolved placeholders or a malformed template
/// - `Encoding` for values that do not fit their slot, or when the
///   parameter count exceeds `max_bind_values` and cannot be chunked
pub fn render_query(
    query: &DbQuery,
    env: &Environment,
    generators: &GeneratorSnapshot,
    max_bind_values: Option<usize>,
) -> Result<Vec<NativeQuery>> {
    let values = query
        .params()
        .iter()
        .map(|a| evaluate_arg(a, env, generators))
        .collect::<Result<Vec<_>>>()?;

    match query {
        DbQuery::RawSql { sql, .. } => {
            check_limit(values.len(), max_bind_values)?;
            let slots: Vec<ArgType> = (0..values.len()).map(|i| query.arg_type(i)).collect();
            Ok(vec![encode_query(sql.clone(), values, slots)?])
        }
        DbQuery::TemplateSql {
            fragments,
            placeholder,
            chunkable,
            ..
        } => {
            let pieces = pair_fragments(fragments, values, query)?;
            let chunks = match max_bind_values {
                Some(limit) if *chunkable => chunk_pieces(pieces, limit),
                _ => vec![pieces],
            };
            chunks
                .into_iter()
                .map(|pieces| {
                    check_limit(pieces.iter().map(Piece::param_count).sum(), max_bind_values)?;
                    render_pieces(&pieces, placeholder)
                })
                .collect()
        }
    }
}

fn check_limit(count: usize, max_bind_values: Option<usize>) -> Result<()> {
    match max_bind_values {
        Some(limit) if count > limit => Err(Error::encoding(
            "params",
            format!("{count} bind values exceed the backend limit of {limit}"),
        )),
        _ => Ok(()),
    }
}

fn encode_query(sql: String, values: Vec<Value>, slots: Vec<ArgType>) -> Result<NativeQuery> {
    let args = values
        .iter()
        .zip(slots.iter())
        .enumerate()
        .map(|(i, (value, slot))| encode(value, slot, &format!("params[{i}]")))
        .collect::<Result<Vec<_>>>()?;
    Ok(NativeQuery::new(sql).with_args(args, slots))
}

// ============================================================================
// Templates
// ============================================================================

#[derive(Debug, Clone)]
enum Piece<'q> {
    Chunk(&'q str),
    Param(Value, ArgType),
    Tuple(Vec<Value>, ArgType),
    TupleList {
        tuples: Vec<Vec<Value>>,
        slot: ArgType,
        fragment: &'q Fragment,
    },
}

impl Piece<'_> {
    fn param_count(&self) -> usize {
        match self {
            Piece::Chunk(_) => 0,
            Piece::Param(..) => 1,
            Piece::Tuple(items, _) => items.len(),
            Piece::TupleList { tuples, .. } => tuples.iter().map(Vec::len).sum(),
        }
    }

    fn is_splittable(&self) -> bool {
        matches!(self, Piece::Tuple(..) | Piece::TupleList { .. })
    }
}

fn pair_fragments<'q>(fragments: &'q [Fragment], values: Vec<Value>, query: &DbQuery) -> Result<Vec<Piece<'q>>> {
    let total = values.len();
    let mut values = values.into_iter().enumerate();
    let mut next = || {
        values.next().ok_or_else(|| {
            Error::binding(format!(
                "malformed query template: fragments read past {total} parameters"
            ))
        })
    };

    let mut pieces = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let piece = match fragment {
            Fragment::StringChunk { chunk } => Piece::Chunk(chunk),
            Fragment::Parameter => {
                let (i, value) = next()?;
                Piece::Param(value, query.arg_type(i))
            }
            Fragment::ParameterTuple => {
                let (i, value) = next()?;
                let items = match value {
                    Value::List(items) => items,
                    cursor @ Value::Cursor(_) => cursor.into_list(),
                    scalar => vec![scalar],
                };
                Piece::Tuple(items, query.arg_type(i))
            }
            Fragment::ParameterTupleList { .. } => {
                let (i, value) = next()?;
                let rows = match value {
                    list @ (Value::List(_) | Value::Cursor(_)) => list.into_list(),
                    other => {
                        return Err(Error::binding(format!(
                            "malformed query template: tuple list expected, got {}",
                            other.type_name()
                        )))
                    }
                };
                if rows.is_empty() {
                    return Err(Error::binding("malformed query template: tuple list cannot be empty"));
                }
                let tuples = rows
                    .into_iter()
                    .map(|row| match row {
                        list @ (Value::List(_) | Value::Cursor(_)) => Ok(list.into_list()),
                        other => Err(Error::binding(format!(
                            "malformed query template: tuple expected, got {}",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<Vec<_>>>()?;
                Piece::TupleList {
                    tuples,
                    slot: query.arg_type(i),
                    fragment,
                }
            }
        };
        pieces.push(piece);
    }
    Ok(pieces)
}

fn chunk_pieces(pieces: Vec<Piece<'_>>, limit: usize) -> Vec<Vec<Piece<'_>>> {
    let total: usize = pieces.iter().map(Piece::param_count).sum();
    if total <= limit {
        return vec![pieces];
    }
    let Some((target, largest)) = pieces
        .iter()
        .enumerate()
        .filter(|(_, p)| p.is_splittable())
        .map(|(i, p)| (i, p.param_count()))
        .max_by(|a, b| a.1.cmp(&b.1).then(b.0.cmp(&a.0)))
    else {
        return vec![pieces];
    };
    let fixed = total - largest;
    if fixed >= limit {
        return vec![pieces];
    }
    let available = limit - fixed;

    let parts: Vec<Piece<'_>> = match &pieces[target] {
        Piece::Tuple(items, slot) => items
            .chunks(available)
            .map(|chunk| Piece::Tuple(chunk.to_vec(), slot.clone()))
            .collect(),
        Piece::TupleList { tuples, slot, fragment } => {
            let mut groups: Vec<Vec<Vec<Value>>> = Vec::new();
            let mut current: Vec<Vec<Value>> = Vec::new();
            let mut current_count = 0;
            for tuple in tuples {
                if !current.is_empty() && current_count + tuple.len() > available {
                    groups.push(std::mem::take(&mut current));
                    current_count = 0;
                }
                current_count += tuple.len();
                current.push(tuple.clone());
            }
            if !current.is_empty() {
                groups.push(current);
            }
            groups
                .into_iter()
                .map(|tuples| Piece::TupleList {
                    tuples,
                    slot: slot.clone(),
                    fragment,
                })
                .collect()
        }
        _ => return vec![pieces],
    };

    parts
        .into_iter()
        .map(|part| {
            let mut chunk = pieces.clone();
            chunk[target] = part;
            chunk
        })
        .collect()
}

fn render_pieces(pieces: &[Piece<'_>], format: &PlaceholderFormat) -> Result<NativeQuery> {
    let mut sql = String::new();
    let mut values = Vec::new();
    let mut slots = Vec::new();
    let mut position = 1;
    let mut placeholder = |values: &mut Vec<Value>, slots: &mut Vec<ArgType>, value: &Value, slot: ArgType| {
        values.push(value.clone());
        slots.push(slot);
        let text = format.render(position);
        position += 1;
        text
    };

    for piece in pieces {
        match piece {
            Piece::Chunk(text) => sql.push_str(text),
            Piece::Param(value, slot) => {
                let text = placeholder(&mut values, &mut slots, value, slot.clone());
                sql.push_str(&text);
            }
            Piece::Tuple(items, slot) => {
                if items.is_empty() {
                    sql.push_str("(NULL)");
                    continue;
                }
                let rendered: Vec<String> = items
                    .iter()
                    .map(|item| placeholder(&mut values, &mut slots, item, slot.element()))
                    .collect();
                sql.push('(');
                sql.push_str(&rendered.join(","));
                sql.push(')');
            }
            Piece::TupleList { tuples, slot, fragment } => {
                let Fragment::ParameterTupleList {
                    item_prefix,
                    item_separator,
                    item_suffix,
                    group_separator,
                } = fragment
                else {
                    return Err(Error::internal("tuple list rendered from a non tuple-list fragment"));
                };
                let groups: Vec<String> = tuples
                    .iter()
                    .map(|tuple| {
                        let items: Vec<String> = tuple
                            .iter()
                            .map(|item| placeholder(&mut values, &mut slots, item, slot.element()))
                            .collect();
                        format!("{item_prefix}{}{item_suffix}", items.join(item_separator))
                    })
                    .collect();
                sql.push_str(&groups.join(group_separator));
            }
        }
    }
    encode_query(sql, values, slots)
}
