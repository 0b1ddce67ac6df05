//! Tables from the plain-text exports. A table is a run of consecutive lines
//! that contain a tab; each tab separates two cells and blank cells are empty.

use log::{ info, warn };
use serde::Serialize;
use std::path::{ Path, PathBuf };

use super::csv::Table;
use super::sections::FUNDAMENTALS_TEXT_FILE;
use super::{ ensure_dir, read_text, write_json, write_text, IngestError };

pub const METHODS_TEXT_FILE: &str = "cooking methods.txt";
pub const METHODS_CSV_FILE: &str = "cooking_methods.csv";
pub const RECIPE_DIR: &str = "foc";

const RECIPE_MARKER: &str = "Name of dish";
const ITEMS_MARKER: &str = "Items";
const METHOD_COLUMNS: [&str; 4] = ["COOKING METHODS", "DESCRIPTION", "MERITS", "DEMERITS"];
const METHOD_TYPE_COLUMN: &str = "TYPE OF METHOD";

/// Rows of optional cells; `None` is an empty cell.
pub type Grid = Vec<Vec<Option<String>>>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeIngredient {
    pub item: String,
    pub quantity: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recipe {
    pub dish_name: Option<String>,
    pub prep_time: Option<String>,
    pub cooking_time: Option<String>,
    pub portions: Option<String>,
    pub unit_size: Option<String>,
    pub ingredients: Vec<RecipeIngredient>,
}

#[derive(Debug, Default)]
pub struct TableReport {
    pub recipes: Vec<PathBuf>,
    pub info_tables: Vec<PathBuf>,
    pub cooking_methods: Option<PathBuf>,
}

fn clean_cell(raw: &str) -> Option<String> {
    let cell = raw.replace('\u{f0b7}', " ");
    let cell = cell.trim();
    if cell.is_empty() { None } else { Some(cell.to_string()) }
}

/// Splits `text` into its tab-separated tables, in order of appearance.
pub fn find_tables(text: &str) -> Vec<Grid> {
    let mut tables = Vec::new();
    let mut current: Grid = Vec::new();
    for line in text.lines() {
        if line.contains('\t') {
            current.push(line.split('\t').map(clean_cell).collect());
        } else if !current.is_empty() {
            tables.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tables.push(current);
    }
    tables
}

fn width(grid: &Grid) -> usize {
    grid.iter().map(|r| r.len()).max().unwrap_or(0)
}

/// Drops rows and columns with no content and pads the rest to a rectangle.
pub fn trim_grid(grid: &Grid) -> Grid {
    let cols = width(grid);
    let keep: Vec<usize> = (0..cols)
        .filter(|&c| grid.iter().any(|r| r.get(c).map_or(false, |v| v.is_some())))
        .collect();
    grid.iter()
        .filter(|r| r.iter().any(|v| v.is_some()))
        .map(|r| keep.iter().map(|&c| r.get(c).cloned().flatten()).collect())
        .collect()
}

fn cell(grid: &Grid, row: usize, col: usize) -> Option<&str> {
    grid.get(row)?.get(col)?.as_deref()
}

fn owned(grid: &Grid, row: usize, col: usize) -> Option<String> {
    cell(grid, row, col).map(|s| s.to_string())
}

/// Reads a recipe card: dish, prep and cooking time on the first row,
/// portions and unit size on the second, then item/quantity pairs (two per
/// row) after the `Items` row.
pub fn extract_recipe(grid: &Grid) -> Option<Recipe> {
    if grid.len() < 2 || width(grid) < 4 {
        warn!("Recipe table too small ({} rows, {} columns)", grid.len(), width(grid));
        return None;
    }

    let mut recipe = Recipe {
        dish_name: owned(grid, 0, 1),
        prep_time: owned(grid, 0, 2),
        cooking_time: owned(grid, 0, 3),
        portions: owned(grid, 1, 1),
        unit_size: owned(grid, 1, 3),
        ingredients: Vec::new(),
    };

    let items_row = (0..grid.len()).find(|&r| cell(grid, r, 0) == Some(ITEMS_MARKER));
    if let Some(start) = items_row {
        let clean = |s: Option<&str>| s.unwrap_or_default().replace('\\', " ");
        for r in start + 1..grid.len() {
            let (Some(first), Some(second)) = (cell(grid, r, 0), cell(grid, r, 2)) else {
                continue;
            };
            recipe.ingredients.push(RecipeIngredient {
                item: clean(Some(first)),
                quantity: clean(cell(grid, r, 1)),
            });
            recipe.ingredients.push(RecipeIngredient {
                item: clean(Some(second)),
                quantity: clean(cell(grid, r, 3)),
            });
        }
    }
    Some(recipe)
}

pub fn recipe_file_name(recipe: &Recipe) -> String {
    let dish = recipe.dish_name.as_deref().unwrap_or("unknown");
    format!("foc_ingredients_{}.json", dish.replace(' ', "_").replace('/', "-"))
}

/// An info list: the top-left cell is blank and columns come in pairs where
/// the right one continues the left. The first merged row is the header.
pub fn is_info_table(grid: &Grid) -> bool {
    grid.len() > 1 && width(grid) > 1 && cell(grid, 0, 0).is_none() && cell(grid, 1, 1).is_none()
}

pub fn extract_info_table(grid: &Grid) -> Option<Table> {
    let cols = width(grid);
    let merged: Vec<Vec<String>> = (0..cols)
        .step_by(2)
        .filter(|c| c + 1 < cols)
        .map(|c| {
            (0..grid.len())
                .map(|r| cell(grid, r, c).or_else(|| cell(grid, r, c + 1)).unwrap_or_default().to_string())
                .collect()
        })
        .collect();
    if merged.is_empty() {
        return None;
    }

    let headers = merged.iter().map(|col| col[0].clone()).collect();
    let rows = (1..grid.len())
        .map(|r| merged.iter().map(|col| col[r].clone()).collect())
        .collect();
    Some(Table { headers, rows })
}

/// Builds the cooking-methods table from the method rows of every table in
/// the export. The first row is the header. A row without a method name
/// continues the row above it, and a row without a description names the
/// type of the methods that follow it.
pub fn build_cooking_methods(tables: &[Grid]) -> Table {
    let mut rows: Vec<Vec<String>> = tables
        .iter()
        .flatten()
        .map(|row| {
            let mut cells: Vec<String> = row.iter().map(|c| c.clone().unwrap_or_default()).collect();
            cells.resize(cells.len().max(METHOD_COLUMNS.len()), String::new());
            // A fifth column means a blank cell pushed the text one cell right.
            if cells.len() > METHOD_COLUMNS.len() {
                if cells[2].is_empty() {
                    cells.remove(2);
                } else if cells[3].is_empty() {
                    cells.remove(3);
                }
            }
            cells.truncate(METHOD_COLUMNS.len());
            cells
        })
        .skip(1)
        .collect();

    let mut merged: Vec<Vec<String>> = Vec::with_capacity(rows.len());
    for row in rows.drain(..) {
        if !row[0].is_empty() {
            merged.push(row);
        } else if let Some(prev) = merged.last_mut() {
            for (p, c) in prev.iter_mut().zip(row) {
                *p = format!("{} {}", p, c).trim().to_string();
            }
        }
    }

    let mut method_type = String::new();
    let mut out = Vec::new();
    for mut row in merged {
        if row[1].is_empty() {
            method_type = row[0].clone();
            continue;
        }
        row.push(method_type.clone());
        out.push(row);
    }

    let mut headers: Vec<String> = METHOD_COLUMNS.iter().map(|h| h.to_string()).collect();
    headers.push(METHOD_TYPE_COLUMN.to_string());
    Table { headers, rows: out }
}

/// Writes recipe cards and info lists from the textbook export into
/// `processed/foc`, and the methods table from `cooking methods.txt`.
pub fn process_text_tables(raw_dir: &Path, output_dir: &Path) -> Result<TableReport, IngestError> {
    let mut report = TableReport::default();

    let methods_path = raw_dir.join(METHODS_TEXT_FILE);
    if methods_path.exists() {
        let tables = find_tables(&read_text(&methods_path)?);
        if tables.is_empty() {
            warn!("x No tables found in {}.", methods_path.display());
        } else {
            ensure_dir(output_dir)?;
            let methods = build_cooking_methods(&tables);
            let out = output_dir.join(METHODS_CSV_FILE);
            write_text(&out, &methods.to_text())?;
            info!("✓ Created {} ({} methods)", METHODS_CSV_FILE, methods.rows.len());
            report.cooking_methods = Some(out);
        }
    } else {
        warn!("x {} not found.", METHODS_TEXT_FILE);
    }

    let foc_path = raw_dir.join(FUNDAMENTALS_TEXT_FILE);
    if !foc_path.exists() {
        warn!("x {} not found, no recipe tables extracted.", FUNDAMENTALS_TEXT_FILE);
        return Ok(report);
    }
    let recipe_dir = output_dir.join(RECIPE_DIR);
    ensure_dir(&recipe_dir)?;

    for (idx, raw) in find_tables(&read_text(&foc_path)?).iter().enumerate() {
        let grid = trim_grid(raw);
        if grid.is_empty() || (grid.len() == 1 && width(&grid) == 1) {
            continue;
        }
        if cell(&grid, 0, 0) == Some(RECIPE_MARKER) {
            if let Some(recipe) = extract_recipe(&grid) {
                let out = recipe_dir.join(recipe_file_name(&recipe));
                write_json(&out, &recipe)?;
                report.recipes.push(out);
            }
        } else if is_info_table(&grid) {
            if let Some(table) = extract_info_table(&grid) {
                let out = recipe_dir.join(format!("foc_table_{}.csv", idx));
                write_text(&out, &table.to_text())?;
                report.info_tables.push(out);
            }
        }
    }
    info!(
        "✓ Extracted {} recipes and {} info tables from {}",
        report.recipes.len(),
        report.info_tables.len(),
        foc_path.display()
    );
    Ok(report)
}
