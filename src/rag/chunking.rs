//! Converts processed data files into retrievable text chunks.
//!
//! Chunk text layouts are fixed: answers quote them back to the user, and the
//! metadata `type` tags decide how a hit is described.

use log::warn;
use serde::{ Deserialize, Serialize };
use serde_json::{ json, Map, Value };
use std::collections::{ BTreeSet, HashMap };
use std::path::Path;

use crate::ingest::csv::Table;
use crate::ingest::{ read_json, read_text };
use crate::ingest::sections::GLOSSARY_KEY;

const TOP_CUISINE_INGREDIENTS: usize = 15;
const COMMENTS_PER_CHUNK: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    pub metadata: Map<String, Value>,
}

impl Chunk {
    fn new(text: String, metadata: Value) -> Self {
        let metadata = match metadata {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { text, metadata }
    }

    pub fn kind(&self) -> &str {
        self.metadata
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
    }
}

/// Capitalises the first letter of every alphabetic run and lowercases the rest.
pub fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_alpha = true;
        } else {
            out.push(c);
            prev_alpha = false;
        }
    }
    out
}

fn humanize(name: &str) -> String {
    title_case(&name.replace('_', " "))
}

// Non-string values are rendered as JSON, the way they appear in the source file.
fn text_of(value: Option<&Value>, default: &str) -> String {
    match value {
        None | Some(Value::Null) => default.to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Chunks the cooking-fundamentals style documents: an introduction, cooking
/// methods with optional techniques, preparation tips and kitchen tools.
pub fn chunk_fcs_json(data: &Value, source: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    if let Some(intro) = data.get("introduction") {
        let title = text_of(data.get("title"), "Introduction");
        chunks.push(
            Chunk::new(
                format!("{}\n\n{}", title, text_of(Some(intro), "")),
                json!({ "type": "introduction", "source": source })
            )
        );
    }

    if let Some(methods) = data.get("cooking_methods").and_then(|m| m.as_object()) {
        for (method_name, method_data) in methods {
            match method_data {
                Value::Object(method) => {
                    if let Some(techniques) = method.get("techniques").and_then(|t| t.as_object()) {
                        let description = text_of(method.get("description"), "");
                        for (tech_name, tech_desc) in techniques {
                            chunks.push(
                                Chunk::new(
                                    format!(
                                        "Method: {}\nCategory Description: {}\nTechnique: {}\n{}",
                                        humanize(method_name),
                                        description,
                                        tech_name,
                                        text_of(Some(tech_desc), "")
                                    ),
                                    json!({
                                        "type": "technique",
                                        "method": method_name,
                                        "technique": tech_name,
                                        "source": source
                                    })
                                )
                            );
                        }
                    } else {
                        chunks.push(
                            Chunk::new(
                                format!(
                                    "Cooking Method: {}\n\n{}",
                                    title_case(method_name),
                                    text_of(method.get("description"), "")
                                ),
                                json!({ "type": "method", "method": method_name, "source": source })
                            )
                        );
                    }
                }
                Value::String(text) => {
                    chunks.push(
                        Chunk::new(
                            format!("Healthy Cooking Method: {}\n\n{}", method_name, text),
                            json!({ "type": "method", "method": method_name, "source": source })
                        )
                    );
                }
                _ => {}
            }
        }
    }

    if let Some(tips) = data.get("food_preparation_tips").and_then(|t| t.as_array()) {
        let lines: Vec<String> = tips
            .iter()
            .map(|tip| format!("- {}", text_of(Some(tip), "")))
            .collect();
        chunks.push(
            Chunk::new(
                format!("Healthy Food Preparation Tips:\n{}", lines.join("\n")),
                json!({ "type": "tips", "source": source })
            )
        );
    }

    if let Some(tools) = data.get("kitchen_tools").and_then(|t| t.as_object()) {
        for (category, cat_data) in tools {
            let Some(items) = cat_data.get("items").and_then(|i| i.as_object()) else {
                continue;
            };
            for (tool, desc) in items {
                chunks.push(
                    Chunk::new(
                        format!(
                            "Kitchen Tool ({}): {}\n\n{}",
                            title_case(category),
                            tool,
                            text_of(Some(desc), "")
                        ),
                        json!({ "type": "tool", "tool": tool, "source": source })
                    )
                );
            }
        }
    }

    chunks
}

/// One chunk per recipe file.
pub fn chunk_recipe_json(data: &Value, source: &str) -> Vec<Chunk> {
    let dish = text_of(data.get("dish_name"), "Unknown");
    let ingredients: Vec<String> = data
        .get("ingredients")
        .and_then(|i| i.as_array())
        .map(|list| {
            list.iter()
                .map(|ing| {
                    format!(
                        "- {}: {}",
                        text_of(ing.get("item"), ""),
                        text_of(ing.get("quantity"), "")
                    )
                })
                .collect()
        })
        .unwrap_or_default();

    let text = format!(
        "Recipe: {}\n\nPrep time: {}\nCooking time: {}\nPortions: {}\n\nIngredients:\n{}",
        dish,
        text_of(data.get("prep_time"), "N/A"),
        text_of(data.get("cooking_time"), "N/A"),
        text_of(data.get("portions"), "N/A"),
        ingredients.join("\n")
    );

    vec![Chunk::new(text, json!({ "type": "recipe", "dish_name": dish, "source": source }))]
}

/// Builds a profile per cuisine plus a cross-reference for ingredients shared
/// by two or more cuisines.
pub fn chunk_cuisine_ingredients(data: &Value, source: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let Some(cuisines) = data.as_object() else {
        warn!("Cuisine data in {} is not an object", source);
        return chunks;
    };

    let mut ingredient_order: Vec<String> = Vec::new();
    let mut ingredient_cuisines: HashMap<String, BTreeSet<String>> = HashMap::new();

    for (cuisine, recipes) in cuisines {
        let recipes: &[Value] = recipes.as_array().map(|r| r.as_slice()).unwrap_or(&[]);

        // Frequencies in first-seen order, so the stable sort keeps ties in that order.
        let mut counts: Vec<(String, usize)> = Vec::new();
        let mut positions: HashMap<String, usize> = HashMap::new();
        for recipe in recipes {
            let Some(items) = recipe.as_array() else {
                continue;
            };
            for item in items.iter().filter_map(|i| i.as_str()) {
                match positions.get(item) {
                    Some(&pos) => {
                        counts[pos].1 += 1;
                    }
                    None => {
                        positions.insert(item.to_string(), counts.len());
                        counts.push((item.to_string(), 1));
                    }
                }
                let entry = ingredient_cuisines.entry(item.to_string()).or_insert_with(|| {
                    ingredient_order.push(item.to_string());
                    BTreeSet::new()
                });
                entry.insert(cuisine.clone());
            }
        }

        let unique = counts.len();
        counts.sort_by(|a, b| b.1.cmp(&a.1));
        let common: Vec<String> = counts
            .iter()
            .take(TOP_CUISINE_INGREDIENTS)
            .map(|(name, _)| humanize(name))
            .collect();

        chunks.push(
            Chunk::new(
                format!(
                    "{} Cuisine\n\nCommon ingredients: {}\n\nBased on {} recipes with {} unique ingredients.",
                    cuisine,
                    common.join(", "),
                    recipes.len(),
                    unique
                ),
                json!({
                    "type": "cuisine_profile",
                    "cuisine": cuisine.to_lowercase(),
                    "num_recipes": recipes.len(),
                    "source": source
                })
            )
        );
    }

    for ingredient in &ingredient_order {
        let Some(found_in) = ingredient_cuisines.get(ingredient) else {
            continue;
        };
        if found_in.len() < 2 {
            continue;
        }
        let list: Vec<&str> = found_in.iter().map(|s| s.as_str()).collect();
        chunks.push(
            Chunk::new(
                format!(
                    "Ingredient: {}\n\nFound in {} cuisines: {}\n\nThis ingredient appears across multiple culinary traditions.",
                    humanize(ingredient),
                    found_in.len(),
                    list.join(", ")
                ),
                json!({
                    "type": "ingredient_cuisine_map",
                    "ingredient": ingredient,
                    "num_cuisines": found_in.len(),
                    "source": source
                })
            )
        );
    }

    chunks
}

pub fn pairing_strength(shared: i64) -> &'static str {
    if shared > 30 {
        "strongly"
    } else if shared > 15 {
        "moderately"
    } else {
        "somewhat"
    }
}

/// Chunks ingredient pairings and per-ingredient category and prevalence.
pub fn chunk_ingredient_data(data: &Value, source: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();

    if let Some(pairs) = data.get("ingredient_pairs").and_then(|p| p.as_array()) {
        for pair in pairs {
            let raw_first = text_of(pair.get("ingredient1"), "");
            let raw_second = text_of(pair.get("ingredient2"), "");
            let (first, second) = (humanize(&raw_first), humanize(&raw_second));
            let shared = pair
                .get("num_shared_compound")
                .and_then(|n| n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)))
                .unwrap_or(0);
            let strength = pairing_strength(shared);
            chunks.push(
                Chunk::new(
                    format!(
                        "Ingredient Pairing: {} and {}\n\nThese ingredients share {} chemical compounds, suggesting they {} complement each other.\nPairing strength: {}\nShared compounds: {}",
                        first,
                        second,
                        shared,
                        strength,
                        title_case(strength),
                        shared
                    ),
                    json!({
                        "type": "ingredient_pairing",
                        "ingredient1": raw_first,
                        "ingredient2": raw_second,
                        "shared_compounds": shared,
                        "source": source
                    })
                )
            );
        }
    }

    if let Some(ingredients) = data.get("ingredients").and_then(|i| i.as_object()) {
        for (name, info) in ingredients {
            let category = text_of(info.get("category"), "unknown");
            let prevalence = info
                .get("prevalence")
                .and_then(|p| p.as_f64())
                .unwrap_or(0.0);
            let mut metadata = json!({
                "type": "ingredient_info",
                "ingredient": name,
                "source": source
            });
            if let Some(Value::String(cat)) = info.get("category") {
                metadata["category"] = Value::String(cat.clone());
            }
            chunks.push(
                Chunk::new(
                    format!(
                        "Ingredient: {}\nCategory: {}\nPrevalence: {:.2}%",
                        humanize(name),
                        title_case(&category),
                        prevalence * 100.0
                    ),
                    metadata
                )
            );
        }
    }

    chunks
}

/// Flattens a whole CSV file into a single chunk of `col: val` rows.
pub fn chunk_csv_simple(path: &Path) -> Vec<Chunk> {
    let table = match read_text(path).and_then(|text| {
        Table::from_text(&text).map_err(|(line, message)| crate::ingest::IngestError::Csv {
            path: path.to_path_buf(),
            line,
            message,
        })
    }) {
        Ok(table) => table,
        Err(e) => {
            warn!("Error chunking CSV {}: {}", path.display(), e);
            return Vec::new();
        }
    };

    let name = file_name(path);
    let mut lines = vec![format!("Data from {}:\n", name)];
    for row in &table.rows {
        let cells: Vec<String> = table.headers
            .iter()
            .zip(row.iter())
            .filter(|(_, val)| !val.trim().is_empty())
            .map(|(col, val)| format!("{}: {}", col, val))
            .collect();
        lines.push(cells.join(" | "));
    }

    vec![
        Chunk::new(
            lines.join("\n"),
            json!({ "type": "csv_data", "source": path.display().to_string(), "filename": name })
        )
    ]
}

/// One chunk per post plus comment chunks grouped five at a time.
pub fn chunk_reddit_json(path: &Path) -> Vec<Chunk> {
    let data = match read_json(path) {
        Ok(data) => data,
        Err(e) => {
            warn!("Error chunking Reddit JSON {}: {}", path.display(), e);
            return Vec::new();
        }
    };
    let Some(posts) = data.as_array() else {
        warn!("Error chunking Reddit JSON {}: expected a list of posts", path.display());
        return Vec::new();
    };

    let source = path.display().to_string();
    let mut chunks = Vec::new();
    for post in posts {
        let title = text_of(post.get("title"), "");
        chunks.push(
            Chunk::new(
                format!("Title: {}\n\nPost: {}", title, text_of(post.get("selftext"), "")),
                json!({ "type": "reddit_post", "source": source, "post_title": title })
            )
        );

        let comments: &[Value] = post
            .get("comments")
            .and_then(|c| c.as_array())
            .map(|c| c.as_slice())
            .unwrap_or(&[]);
        for group in comments.chunks(COMMENTS_PER_CHUNK) {
            let mut text = format!("Comments for post '{}':\n", title);
            for comment in group {
                text.push_str(
                    &format!(
                        "{}: {}\n",
                        text_of(comment.get("author"), "User"),
                        text_of(comment.get("body"), "")
                    )
                );
            }
            chunks.push(
                Chunk::new(
                    text,
                    json!({ "type": "reddit_comments", "source": source, "post_title": title })
                )
            );
        }
    }
    chunks
}

/// Chunks textbook sections and glossary terms.
pub fn chunk_sections_json(data: &Value, source: &str) -> Vec<Chunk> {
    let mut chunks = Vec::new();
    let Some(sections) = data.as_object() else {
        return chunks;
    };

    for (title, body) in sections {
        if title == GLOSSARY_KEY {
            let Some(terms) = body.as_object() else {
                continue;
            };
            for (term, definition) in terms {
                chunks.push(
                    Chunk::new(
                        format!("Glossary: {}\n\n{}", term, text_of(Some(definition), "")),
                        json!({ "type": "glossary", "term": term, "source": source })
                    )
                );
            }
        } else {
            chunks.push(
                Chunk::new(
                    format!("Section: {}\n\n{}", title, text_of(Some(body), "")),
                    json!({ "type": "section", "section": title, "source": source })
                )
            );
        }
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_case_follows_word_boundaries() {
        assert_eq!(title_case("stir fry"), "Stir Fry");
        assert_eq!(title_case("deep_frying"), "Deep_Frying");
        assert_eq!(title_case("KNIVES and cutters"), "Knives And Cutters");
        assert_eq!(humanize("olive_oil"), "Olive Oil");
    }

    #[test]
    fn fcs_document_produces_every_chunk_kind() {
        let data = json!({
            "title": "Cooking Basics",
            "introduction": "Heat changes food.",
            "cooking_methods": {
                "dry_heat": {
                    "description": "No water involved.",
                    "techniques": { "Roasting": "Cook in an oven." }
                },
                "moist_heat": { "description": "Uses water." },
                "Steaming": "Cook over boiling water."
            },
            "food_preparation_tips": ["Trim fat", "Use herbs"],
            "kitchen_tools": {
                "cutting": { "items": { "Chef knife": "All-purpose blade." } }
            }
        });
        let chunks = chunk_fcs_json(&data, "data/processed/FCS.json");
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();

        assert_eq!(texts[0], "Cooking Basics\n\nHeat changes food.");
        assert!(
            texts.contains(
                &"Method: Dry Heat\nCategory Description: No water involved.\nTechnique: Roasting\nCook in an oven."
            )
        );
        assert!(texts.contains(&"Cooking Method: Moist_Heat\n\nUses water."));
        assert!(texts.contains(&"Healthy Cooking Method: Steaming\n\nCook over boiling water."));
        assert!(texts.contains(&"Healthy Food Preparation Tips:\n- Trim fat\n- Use herbs"));
        assert!(texts.contains(&"Kitchen Tool (Cutting): Chef knife\n\nAll-purpose blade."));

        let kinds: Vec<&str> = chunks.iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, ["introduction", "technique", "method", "method", "tips", "tool"]);
    }

    #[test]
    fn introduction_title_defaults() {
        let chunks = chunk_fcs_json(&json!({ "introduction": "Welcome." }), "x.json");
        assert_eq!(chunks[0].text, "Introduction\n\nWelcome.");
    }

    #[test]
    fn recipe_fields_default_when_missing() {
        let data = json!({
            "dish_name": "Miso Soup",
            "portions": 2,
            "ingredients": [{ "item": "miso", "quantity": "2 tbsp" }]
        });
        let chunk = &chunk_recipe_json(&data, "foc/miso.json")[0];
        assert_eq!(
            chunk.text,
            "Recipe: Miso Soup\n\nPrep time: N/A\nCooking time: N/A\nPortions: 2\n\nIngredients:\n- miso: 2 tbsp"
        );
        assert_eq!(chunk.metadata["dish_name"], "Miso Soup");
        assert!(!chunk.metadata.contains_key("dish"));
        let unnamed = &chunk_recipe_json(&json!({}), "x")[0];
        assert_eq!(unnamed.text.lines().next(), Some("Recipe: Unknown"));
        assert_eq!(unnamed.metadata["dish_name"], "Unknown");
    }

    #[test]
    fn cuisine_profiles_rank_ingredients_and_map_shared_ones() {
        let data = json!({
            "Korean": [["garlic", "soy_sauce"], ["garlic", "sesame_oil"], ["soy_sauce"]],
            "Italian": [["tomato", "garlic"], ["basil"]]
        });
        let chunks = chunk_cuisine_ingredients(&data, "cuisine.json");
        assert_eq!(chunks.len(), 3);
        assert_eq!(
            chunks[0].text,
            "Korean Cuisine\n\nCommon ingredients: Garlic, Soy Sauce, Sesame Oil\n\nBased on 3 recipes with 3 unique ingredients."
        );
        assert_eq!(chunks[0].metadata["cuisine"], "korean");
        assert_eq!(chunks[0].metadata["num_recipes"], 3);
        assert_eq!(
            chunks[2].text,
            "Ingredient: Garlic\n\nFound in 2 cuisines: Italian, Korean\n\nThis ingredient appears across multiple culinary traditions."
        );
    }

    #[test]
    fn profile_keeps_only_top_fifteen() {
        let recipe: Vec<String> = (0..20).map(|i| format!("item{}", i)).collect();
        let chunks = chunk_cuisine_ingredients(&json!({ "Test": [recipe] }), "c.json");
        let listed = chunks[0].text.split("Common ingredients: ").nth(1).unwrap();
        let listed = listed.split("\n\n").next().unwrap();
        assert_eq!(listed.split(", ").count(), 15);
        assert!(chunks[0].text.ends_with("with 20 unique ingredients."));
    }

    #[test]
    fn pairing_strength_thresholds() {
        assert_eq!(pairing_strength(31), "strongly");
        assert_eq!(pairing_strength(30), "moderately");
        assert_eq!(pairing_strength(16), "moderately");
        assert_eq!(pairing_strength(15), "somewhat");
    }

    #[test]
    fn ingredient_data_chunks() {
        let data = json!({
            "ingredient_pairs": [{ "ingredient1": "black_pepper", "ingredient2": "beef", "num_shared_compound": 40 }],
            "ingredients": { "beef": { "category": "meat", "prevalence": 0.1234 } }
        });
        let chunks = chunk_ingredient_data(&data, "ingredient_data.json");
        assert_eq!(
            chunks[0].text,
            "Ingredient Pairing: Black Pepper and Beef\n\nThese ingredients share 40 chemical compounds, suggesting they strongly complement each other.\nPairing strength: Strongly\nShared compounds: 40"
        );
        assert_eq!(chunks[1].text, "Ingredient: Beef\nCategory: Meat\nPrevalence: 12.34%");
        assert_eq!(chunks[0].metadata["ingredient1"], "black_pepper");
        assert_eq!(chunks[0].metadata["ingredient2"], "beef");
        assert_eq!(chunks[1].metadata["ingredient"], "beef");
        assert_eq!(chunks[1].metadata["category"], "meat");
    }

    #[test]
    fn csv_rows_skip_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temps.csv");
        std::fs::write(&path, "food,temp\nchicken,74C\nfish,\n").unwrap();
        let chunks = chunk_csv_simple(&path);
        assert_eq!(chunks[0].text, "Data from temps.csv:\n\nfood: chicken | temp: 74C\nfood: fish");
        assert_eq!(chunks[0].metadata["filename"], "temps.csv");
    }

    #[test]
    fn reddit_comments_grouped_by_five() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.json");
        let comments: Vec<Value> = (0..7)
            .map(|i| json!({ "author": if i == 0 { Value::Null } else { json!(format!("u{}", i)) }, "body": "nice" }))
            .collect();
        std::fs::write(
            &path,
            json!([{ "title": "Crispy skin?", "selftext": "Help", "comments": comments }]).to_string()
        ).unwrap();

        let chunks = chunk_reddit_json(&path);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Title: Crispy skin?\n\nPost: Help");
        assert!(chunks[1].text.starts_with("Comments for post 'Crispy skin?':\nUser: nice\nu1: nice\n"));
        assert_eq!(chunks[1].text.lines().count(), 6);
        assert_eq!(chunks[2].text.lines().count(), 3);
    }

    #[test]
    fn malformed_files_yield_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(chunk_reddit_json(&path).is_empty());
        assert!(chunk_csv_simple(&dir.path().join("missing.csv")).is_empty());
    }

    #[test]
    fn sections_and_glossary() {
        let data = json!({
            "Dry Heat Methods": "Roasting uses hot air.",
            "Glossary": { "Braise": "Cook slowly in liquid." }
        });
        let chunks = chunk_sections_json(&data, "foc_sections.json");
        assert_eq!(chunks[0].text, "Section: Dry Heat Methods\n\nRoasting uses hot air.");
        assert_eq!(chunks[1].text, "Glossary: Braise\n\nCook slowly in liquid.");
        assert_eq!(chunks[1].kind(), "glossary");
    }
}
