//! Model fixtures shared by unit tests.

use crate::domain::features::{is_categorical, CATEGORICAL_FEATURES, NUMERIC_FEATURES};
use serde_json::json;

/// Two trees over `store_id` (categorical: CA_1, CA_2, TX_1), `sell_price`, `snap_CA`.
///
/// Tree 0 sends CA_1 and TX_1 to leaf 1.5, otherwise `sell_price <= 2.5` -> 0.25 else -0.5.
/// Tree 1 adds a constant 0.125.
pub(crate) const TOY_MODEL: &str = "tree
version=v3
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx=2
objective=regression
feature_names=store_id sell_price snap_CA
feature_infos=0:1:2 [0.5:9.98] [0:1]
tree_sizes=420 260

Tree=0
num_leaves=3
num_cat=1
split_feature=0 1
split_gain=10 5
threshold=0 2.5
decision_type=1 2
left_child=-1 -2
right_child=1 -3
leaf_value=1.5 0.25 -0.5
leaf_weight=1 1 1
leaf_count=1 1 1
internal_value=0 0
internal_weight=0 0
internal_count=3 2
cat_boundaries=0 1
cat_threshold=5
is_linear=0
shrinkage=1


Tree=1
num_leaves=1
num_cat=0
split_feature=
split_gain=
threshold=
decision_type=
left_child=
right_child=
leaf_value=0.125
leaf_weight=
leaf_count=
internal_value=
internal_weight=
internal_count=
is_linear=0
shrinkage=1


end of trees

feature_importances:
store_id=1
sell_price=1

parameters:
[boosting: gbdt]
[objective: regression]
end of parameters

pandas_categorical:[[\"CA_1\", \"CA_2\", \"TX_1\"]]
";

/// The sixteen serving features in training order.
pub(crate) fn serving_features() -> Vec<&'static str> {
    CATEGORICAL_FEATURES
        .iter()
        .chain(NUMERIC_FEATURES.iter())
        .copied()
        .collect()
}

fn categories_for(name: &str) -> serde_json::Value {
    match name {
        "dept_id" => json!(["FOODS_1", "FOODS_2", "FOODS_3", "HOBBIES_1"]),
        "cat_id" => json!(["FOODS", "HOBBIES", "HOUSEHOLD"]),
        "store_id" => json!(["CA_1", "CA_2", "TX_1"]),
        "state_id" => json!(["CA", "TX", "WI"]),
        "event_name_1" => json!(["Mother's day", "SuperBowl"]),
        "event_type_1" => json!(["Cultural", "Sporting"]),
        "event_name_2" => json!(["Easter"]),
        _ => json!(["Cultural"]),
    }
}

/// A forecast model over `feature_names`, which must include `store_id`, `sell_price` and
/// `dias_desde_ultima_compra`.
///
/// Tree 0: stores other than CA_1 -> -1.0; CA_1 with `sell_price <= 2.5` -> 0.5; otherwise
/// gap `<= 1.5` days -> 1.0, longer gap -> 2.0. Tree 1 adds 0.25.
pub(crate) fn forecast_model_text(feature_names: &[&str]) -> String {
    let pos = |name: &str| {
        feature_names
            .iter()
            .position(|n| *n == name)
            .unwrap_or_else(|| panic!("fixture needs feature {name}"))
    };
    let categories: Vec<serde_json::Value> = feature_names
        .iter()
        .filter(|n| is_categorical(n))
        .map(|n| categories_for(n))
        .collect();

    format!(
        "tree
version=v3
num_class=1
num_tree_per_iteration=1
label_index=0
max_feature_idx={max_idx}
objective=regression
feature_names={names}

Tree=0
num_leaves=4
num_cat=1
split_feature={store} {price} {gap}
split_gain=3 2 1
threshold=0 2.5 1.5
decision_type=1 2 2
left_child=1 -2 -3
right_child=-1 2 -4
leaf_value=-1 0.5 1 2
cat_boundaries=0 1
cat_threshold=1
shrinkage=1


Tree=1
num_leaves=1
num_cat=0
leaf_value=0.25
shrinkage=1


end of trees

pandas_categorical:{cats}
",
        max_idx = feature_names.len() - 1,
        names = feature_names.join(" "),
        store = pos("store_id"),
        price = pos("sell_price"),
        gap = pos("dias_desde_ultima_compra"),
        cats = serde_json::Value::Array(categories),
    )
}
