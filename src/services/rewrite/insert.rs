use crate::error::Result;
use crate::models::{BoundStatement, GeneratedKeyContext, InsertForm, InsertRow, SqlSpan};
use crate::services::rewrite::{failure, render, Edit};

/// Edits appending a generated key column and one value per row.
pub(super) fn generated_key_edits(
    statement: &BoundStatement,
    keys: &GeneratedKeyContext,
) -> Result<Vec<Edit>> {
    let sql = &statement.sql;
    let Some(insert) = &statement.insert else {
        return Ok(Vec::new());
    };
    if keys.values.len() != insert.rows.len() {
        return Err(failure(
            sql,
            format!(
                "{} generated key(s) for {} row(s)",
                keys.values.len(),
                insert.rows.len()
            ),
        ));
    }
    let mut edits = Vec::new();
    match &insert.form {
        InsertForm::Values { .. } => {
            let end = insert
                .column_list_end
                .ok_or_else(|| failure(sql, "generated key needs an explicit column list"))?;
            edits.push(Edit::new(SqlSpan::point(end), format!(", {}", keys.column)));
            for (row, value) in insert.rows.iter().zip(&keys.values) {
                let close = row.span.stop.saturating_sub(1);
                if SqlSpan::new(close, row.span.stop).slice(sql) != ")" {
                    return Err(failure(sql, "INSERT row does not end with ')'"));
                }
                edits.push(Edit::new(
                    SqlSpan::point(close),
                    format!(", {}", value.to_sql_literal()),
                ));
            }
        }
        InsertForm::Set { end } => {
            if let Some(value) = keys.values.first() {
                edits.push(Edit::new(
                    SqlSpan::point(*end),
                    format!(", {} = {}", keys.column, value.to_sql_literal()),
                ));
            }
        }
        InsertForm::Select => {}
    }
    Ok(edits)
}

/// Rows of a split INSERT that do not belong to the unit.
pub(super) fn dropped_rows(statement: &BoundStatement, kept: Option<&[usize]>) -> Vec<SqlSpan> {
    let (Some(insert), Some(kept)) = (&statement.insert, kept) else {
        return Vec::new();
    };
    insert
        .rows
        .iter()
        .enumerate()
        .filter(|(index, _)| !kept.contains(index))
        .map(|(_, row)| row.span)
        .collect()
}

/// Replaces the VALUES list with the kept rows, each carrying its own edits.
/// Edits that land inside a row are consumed.
pub(super) fn split_values(
    statement: &BoundStatement,
    kept: &[usize],
    edits: &mut Vec<Edit>,
) -> Result<Option<Edit>> {
    let sql = &statement.sql;
    let Some(insert) = &statement.insert else {
        return Ok(None);
    };
    let InsertForm::Values { span } = &insert.form else {
        return Ok(None);
    };
    if kept.len() == insert.rows.len() {
        return Ok(None);
    }
    let rows: Vec<&InsertRow> = insert
        .rows
        .iter()
        .enumerate()
        .filter(|(index, _)| kept.contains(index))
        .map(|(_, row)| row)
        .collect();
    if rows.is_empty() {
        return Err(failure(sql, "route unit owns no INSERT rows"));
    }

    let (inside, outside): (Vec<Edit>, Vec<Edit>) = edits
        .drain(..)
        .partition(|edit| span.contains(&edit.span));
    *edits = outside;

    let mut rendered = Vec::with_capacity(rows.len());
    for row in rows {
        let row_edits: Vec<Edit> = inside
            .iter()
            .filter(|edit| row.span.contains(&edit.span))
            .cloned()
            .collect();
        rendered.push(render(sql, row.span, row_edits)?);
    }
    Ok(Some(Edit::new(*span, rendered.join(", "))))
}
