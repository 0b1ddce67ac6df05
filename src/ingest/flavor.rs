use log::{ info, warn };
use serde::{ Deserialize, Serialize };
use serde_json::{ Map, Value };
use std::collections::{ BTreeMap, HashSet };
use std::path::{ Path, PathBuf };

use super::csv::Table;
use super::{ ensure_dir, read_text, write_json, IngestError };

pub const BACKBONE_FILE: &str = "backbone.csv";
pub const CUISINE_FILE: &str = "srep00196-s3.csv";
pub const INGREDIENT_DATA_FILE: &str = "ingredient_data.json";
pub const CUISINE_DATA_FILE: &str = "cuisine_ingredient_data.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientPair {
    pub ingredient1: String,
    pub ingredient2: String,
    pub num_shared_compound: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngredientInfo {
    pub category: String,
    pub prevalence: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IngredientData {
    pub ingredient_pairs: Vec<IngredientPair>,
    pub ingredients: BTreeMap<String, IngredientInfo>,
}

#[derive(Debug, Default)]
pub struct FlavorReport {
    pub ingredient_data: Option<PathBuf>,
    pub cuisine_data: Option<PathBuf>,
    pub pairs: usize,
    pub ingredients: usize,
    pub cuisines: usize,
}

/// Builds pair and ingredient tables from the flavor-network backbone.
///
/// Columns are positional: ingredient1, ingredient2, num_shared_compound,
/// category, prevalence. Pairs are deduplicated regardless of column order,
/// and the first row naming an ingredient in the first column wins its info.
pub fn build_ingredient_data(table: &Table) -> IngredientData {
    let mut data = IngredientData::default();
    let mut seen_pairs: HashSet<(String, String)> = HashSet::new();

    for (idx, row) in table.rows.iter().enumerate() {
        if row.len() < 5 {
            warn!("Skipping backbone row {}: expected 5 columns, got {}", idx + 2, row.len());
            continue;
        }
        let (a, b) = (row[0].trim(), row[1].trim());
        let shared = match parse_count(&row[2]) {
            Some(n) => n,
            None => {
                warn!("Skipping backbone row {}: bad compound count '{}'", idx + 2, row[2]);
                continue;
            }
        };

        let pair = if a <= b { (a.to_string(), b.to_string()) } else { (b.to_string(), a.to_string()) };
        if seen_pairs.insert(pair.clone()) {
            data.ingredient_pairs.push(IngredientPair {
                ingredient1: pair.0,
                ingredient2: pair.1,
                num_shared_compound: shared,
            });
        }

        if !data.ingredients.contains_key(a) {
            let prevalence = row[4].trim().parse::<f64>().unwrap_or_else(|_| {
                warn!("Backbone row {}: bad prevalence '{}', using 0", idx + 2, row[4]);
                0.0
            });
            data.ingredients.insert(a.to_string(), IngredientInfo {
                category: row[3].trim().to_string(),
                prevalence,
            });
        }
    }
    data
}

// Counts may be exported as floats ("12.0").
fn parse_count(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    raw.parse::<i64>()
        .ok()
        .or_else(|| raw.parse::<f64>().ok().filter(|f| f.is_finite()).map(|f| f as i64))
}

/// Groups recipes by cuisine, keeping cuisines in first-seen order.
/// Each line is `cuisine,ingredient,ingredient,...` without quoting.
pub fn build_cuisine_data(text: &str) -> Map<String, Value> {
    let mut cuisines: Map<String, Value> = Map::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut parts = line.split(',');
        let cuisine = parts.next().unwrap_or_default().to_string();
        let ingredients: Vec<Value> = parts.map(|s| Value::String(s.to_string())).collect();

        let recipes = cuisines.entry(cuisine).or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(list) = recipes {
            list.push(Value::Array(ingredients));
        }
    }
    cuisines
}

pub fn process_flavor_network(raw_dir: &Path, output_dir: &Path) -> Result<FlavorReport, IngestError> {
    ensure_dir(output_dir)?;
    info!("Processing flavor data from {}...", raw_dir.display());
    let mut report = FlavorReport::default();

    let backbone = raw_dir.join(BACKBONE_FILE);
    if backbone.exists() {
        let table = Table::from_text(&read_text(&backbone)?).map_err(|(line, message)| {
            IngestError::Csv { path: backbone.clone(), line, message }
        })?;
        let data = build_ingredient_data(&table);
        let out = output_dir.join(INGREDIENT_DATA_FILE);
        write_json(&out, &data)?;
        report.pairs = data.ingredient_pairs.len();
        report.ingredients = data.ingredients.len();
        report.ingredient_data = Some(out);
        info!("✓ Created {} ({} pairs, {} ingredients)", INGREDIENT_DATA_FILE, report.pairs, report.ingredients);
    } else {
        warn!("x {} not found.", BACKBONE_FILE);
    }

    let cuisine_file = raw_dir.join(CUISINE_FILE);
    if cuisine_file.exists() {
        let cuisines = build_cuisine_data(&read_text(&cuisine_file)?);
        let out = output_dir.join(CUISINE_DATA_FILE);
        write_json(&out, &cuisines)?;
        report.cuisines = cuisines.len();
        report.cuisine_data = Some(out);
        info!("✓ Created {} ({} cuisines)", CUISINE_DATA_FILE, report.cuisines);
    } else {
        warn!("x {} not found.", CUISINE_FILE);
    }

    Ok(report)
}
