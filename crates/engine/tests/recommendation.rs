//! End-to-end pipeline: distance table -> aggregation -> trained model ->
//! selection and explanation, with a real boosted-tree artifact.

use data_loader::{DistanceRecord, DistanceTable, Feature, LocationId, MODEL_INPUT_WIDTH, Side};
use engine::{ExplainerConfig, RecommendationEngine, candidate_pool};
use match_model::{GbdtModel, ProbabilityModel};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Artifact over the real 18-column schema with two stumps:
/// - Tree 0 rewards a high liked-side scene mean (f0 > 0.5 -> +2.0)
/// - Tree 1 penalizes a high disliked-side scene mean (f9 > 0.5 -> -1.0)
fn scene_artifact() -> String {
    let names: Vec<String> = Side::ALL
        .into_iter()
        .flat_map(|side| Feature::ALL.into_iter().map(move |f| side.qualified_name(f)))
        .collect();
    format!(
        "version=v4\n\
         num_class=1\n\
         max_feature_idx={}\n\
         objective=binary sigmoid:1\n\
         feature_names={}\n\
         \n\
         Tree=0\n\
         num_leaves=2\n\
         split_feature=0\n\
         threshold=0.5\n\
         decision_type=2\n\
         left_child=-1\n\
         right_child=-2\n\
         leaf_value=-2.0 2.0\n\
         \n\
         Tree=1\n\
         num_leaves=2\n\
         split_feature={}\n\
         threshold=0.5\n\
         decision_type=2\n\
         left_child=-1\n\
         right_child=-2\n\
         leaf_value=1.0 -1.0\n\
         \n\
         end of trees\n",
        MODEL_INPUT_WIDTH - 1,
        names.join(" "),
        Feature::COUNT,
    )
}

fn scene_record(a: &str, b: &str, scenes: f64) -> DistanceRecord {
    let mut values = [None; Feature::COUNT];
    values[Feature::Scenes.index()] = Some(scenes);
    DistanceRecord {
        a: a.to_string(),
        b: b.to_string(),
        region_a: "US".to_string(),
        region_b: "US".to_string(),
        values,
    }
}

fn set(items: &[&str]) -> BTreeSet<LocationId> {
    items.iter().map(|s| s.to_string()).collect()
}

fn build_engine(table: DistanceTable) -> RecommendationEngine {
    let model = GbdtModel::from_text(&scene_artifact()).expect("artifact parses");
    assert_eq!(model.num_features(), MODEL_INPUT_WIDTH);
    RecommendationEngine::new(Arc::new(table), Arc::new(model)).with_explainer(ExplainerConfig {
        seed: Some(1),
        ..ExplainerConfig::default()
    })
}

fn reference_table() -> DistanceTable {
    let mut table = DistanceTable::new();
    table.insert_record(scene_record("Denver", "Austin", 0.9));
    table.insert_record(scene_record("Denver", "Reno", 0.2));
    table.insert_record(scene_record("Portland", "Austin", 0.3));
    table.insert_record(scene_record("Portland", "Reno", 0.8));
    table
}

#[test]
fn test_best_candidate_wins_with_banded_confidence() {
    let engine = build_engine(reference_table());
    let pool = candidate_pool(engine.table(), &set(&["Austin"]), &set(&["Reno"]), None);
    assert_eq!(pool, set(&["Denver", "Portland"]));

    let rec = engine
        .recommend(&pool, &set(&["Austin"]), &set(&["Reno"]))
        .unwrap();

    // Denver: raw score 2.0 + 1.0 -> sigmoid(3) ~ 0.953 -> clamped to 95
    assert_eq!(rec.location, "Denver");
    assert_eq!(rec.confidence, 95);
    assert_eq!(rec.raw_distances.get("top_scenesDistance"), Some(&0.9));
    assert_eq!(rec.raw_distances.get("bottom_scenesDistance"), Some(&0.2));
}

#[test]
fn test_explanation_covers_the_present_slots() {
    let engine = build_engine(reference_table());
    let rec = engine
        .recommend(
            &set(&["Denver", "Portland"]),
            &set(&["Austin"]),
            &set(&["Reno"]),
        )
        .unwrap();

    assert_eq!(rec.explanation.len(), 2);
    // The liked-side scene mean sits right above the model's split and
    // dominates the local fit
    let top = rec
        .explanation
        .weight("mean_top_scenesDistance")
        .expect("liked-side term present");
    assert!(top > 0.0);
    assert!(rec.explanation.weight("mean_bottom_scenesDistance").is_some());
}

#[test]
fn test_swapping_preferences_swaps_the_winner() {
    let engine = build_engine(reference_table());
    let rec = engine
        .recommend(
            &set(&["Denver", "Portland"]),
            &set(&["Reno"]),
            &set(&["Austin"]),
        )
        .unwrap();
    // Portland: liked(Reno)=0.8 -> +2.0, disliked(Austin)=0.3 -> +1.0
    assert_eq!(rec.location, "Portland");
    assert_eq!(rec.confidence, 95);
}

#[test]
fn test_one_sided_preferences_still_score() {
    let mut table = DistanceTable::new();
    table.insert_record(scene_record("Denver", "Austin", 0.9));
    table.insert_record(scene_record("Portland", "Austin", 0.3));

    let engine = build_engine(table);
    let rec = engine
        .recommend(&set(&["Denver", "Portland"]), &set(&["Austin"]), &set(&[]))
        .unwrap();

    // Disliked-side slot is NaN; tree 1 routes through its default (left,
    // +1.0) rather than treating the gap as zero
    assert_eq!(rec.location, "Denver");
    assert_eq!(rec.confidence, 95);
    assert!(!rec.raw_distances.contains_key("bottom_scenesDistance"));
}

#[test]
fn test_disconnected_pool_degrades_to_flagged_random_pick() {
    let mut table = DistanceTable::new();
    table.insert_record(scene_record("Denver", "Portland", 0.5));

    let engine = build_engine(table);
    let rec = engine
        .recommend(&set(&["Denver", "Portland"]), &set(&["Austin"]), &set(&["Reno"]))
        .unwrap();

    assert!(["Denver", "Portland"].contains(&rec.location.as_str()));
    assert!((60..=95).contains(&rec.confidence));
    assert_eq!(rec.explanation.weight("random_recommendation"), Some(1.0));
    assert_eq!(rec.raw_distances.get("insufficient_data"), Some(&1.0));
}

#[test]
fn test_same_inputs_same_recommendation() {
    let run = || {
        build_engine(reference_table())
            .recommend(
                &set(&["Denver", "Portland"]),
                &set(&["Austin"]),
                &set(&["Reno"]),
            )
            .unwrap()
    };
    let a = run();
    let b = run();
    assert_eq!(a.location, b.location);
    assert_eq!(a.confidence, b.confidence);
    assert_eq!(a.explanation, b.explanation);
}
