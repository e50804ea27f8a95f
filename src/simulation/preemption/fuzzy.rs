use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use ahash::HashMap;
use serde::Deserialize;
use tracing::info;

use crate::simulation::error::EngineError;

/// Triangular membership function over `(a, b, c)`: zero outside `[a, c]`, one at `b`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriMf {
    a: f64,
    b: f64,
    c: f64,
}

impl TriMf {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        TriMf { a, b, c }
    }

    pub fn membership(&self, x: f64) -> f64 {
        if x <= self.a || x >= self.c {
            return 0.0;
        }
        if x == self.b {
            return 1.0;
        }
        if x < self.b {
            ((x - self.a) / (self.b - self.a).max(1e-6)).max(0.0)
        } else {
            ((self.c - x) / (self.c - self.b).max(1e-6)).max(0.0)
        }
    }
}

/// Crisp inputs to the inference step, one sample per ambulance and candidate light.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Features {
    pub dist_to_tls: f64,
    pub ambulance_speed: f64,
    pub queue_length: f64,
    pub eta_seconds: f64,
    pub phase_index: f64,
    pub phase_remaining: f64,
}

impl Features {
    fn get(&self, variable: &str) -> f64 {
        match variable {
            "dist_to_tls" => self.dist_to_tls,
            "ambulance_speed" => self.ambulance_speed,
            "queue_length" => self.queue_length,
            "eta_seconds" => self.eta_seconds,
            "phase_index" => self.phase_index,
            "phase_remaining" => self.phase_remaining,
            _ => 0.0,
        }
    }
}

/// A conjunction of `variable = label` clauses with a scalar weight. Firing strength
/// is the minimum clause membership.
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub conditions: Vec<(String, String)>,
    pub weight: f64,
}

impl Rule {
    fn new(conditions: &[(&str, &str)], weight: f64) -> Self {
        Rule {
            conditions: conditions
                .iter()
                .map(|(variable, label)| (variable.to_string(), label.to_string()))
                .collect(),
            weight,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FuzzyParams {
    pub trigger_threshold: f64,
    pub near_force_distance_m: f64,
    pub release_distance_m: f64,
}

impl Default for FuzzyParams {
    fn default() -> Self {
        FuzzyParams {
            trigger_threshold: 0.5,
            near_force_distance_m: 200.0,
            release_distance_m: 50.0,
        }
    }
}

/// Sugeno-style rule banks for the preemption decision. The trigger bank produces a
/// probability, the extend bank an imposed green duration.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyModel {
    fuzzy_sets: HashMap<String, HashMap<String, TriMf>>,
    rules_trigger: Vec<Rule>,
    rules_extend: Vec<Rule>,
    pub min_green: f64,
    pub max_green: f64,
    pub params: FuzzyParams,
}

impl Default for FuzzyModel {
    fn default() -> Self {
        let mut fuzzy_sets: HashMap<String, HashMap<String, TriMf>> = HashMap::default();
        fuzzy_sets.insert(
            "dist_to_tls".to_string(),
            labelled([
                ("near", TriMf::new(0.0, 30.0, 80.0)),
                ("mid", TriMf::new(50.0, 120.0, 200.0)),
                ("far", TriMf::new(150.0, 300.0, 500.0)),
            ]),
        );
        fuzzy_sets.insert(
            "ambulance_speed".to_string(),
            labelled([
                ("low", TriMf::new(0.0, 2.0, 5.0)),
                ("med", TriMf::new(3.0, 7.0, 11.0)),
                ("high", TriMf::new(9.0, 14.0, 20.0)),
            ]),
        );
        fuzzy_sets.insert(
            "queue_length".to_string(),
            labelled([
                ("short", TriMf::new(0.0, 0.0, 10.0)),
                ("med", TriMf::new(5.0, 20.0, 40.0)),
                ("long", TriMf::new(30.0, 60.0, 100.0)),
            ]),
        );
        fuzzy_sets.insert(
            "eta_seconds".to_string(),
            labelled([
                ("soon", TriMf::new(0.0, 4.0, 8.0)),
                ("mid", TriMf::new(6.0, 10.0, 16.0)),
                ("late", TriMf::new(12.0, 20.0, 35.0)),
            ]),
        );
        fuzzy_sets.insert(
            "phase_remaining".to_string(),
            labelled([
                ("short", TriMf::new(0.0, 1.0, 3.0)),
                ("mid", TriMf::new(2.0, 6.0, 10.0)),
                ("long", TriMf::new(8.0, 14.0, 22.0)),
            ]),
        );

        let rules_trigger = vec![
            Rule::new(&[("dist_to_tls", "near"), ("eta_seconds", "soon")], 1.0),
            Rule::new(&[("dist_to_tls", "near"), ("queue_length", "long")], 0.9),
            Rule::new(&[("dist_to_tls", "mid"), ("ambulance_speed", "high")], 0.8),
            Rule::new(&[("queue_length", "long")], 0.7),
            Rule::new(&[("phase_remaining", "short"), ("eta_seconds", "soon")], 0.85),
        ];
        // extend weights are seconds added on top of the minimum green
        let rules_extend = vec![
            Rule::new(&[("dist_to_tls", "near")], 10.0),
            Rule::new(&[("queue_length", "long")], 4.0),
            Rule::new(&[("ambulance_speed", "low")], 2.0),
            Rule::new(&[("phase_remaining", "short")], 3.0),
        ];

        FuzzyModel {
            fuzzy_sets,
            rules_trigger,
            rules_extend,
            min_green: 6.0,
            max_green: 20.0,
            params: FuzzyParams::default(),
        }
    }
}

impl FuzzyModel {
    /// Loads a model document, falling back to the defaults for any absent section.
    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let file = File::open(path).map_err(|e| EngineError::io(path, e))?;
        let io_model: IoFuzzyModel = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| EngineError::parse(path, e))?;
        info!("Loaded fuzzy model from {path:?}");
        Ok(Self::from(io_model))
    }

    fn membership(&self, variable: &str, label: &str, x: f64) -> f64 {
        self.fuzzy_sets
            .get(variable)
            .and_then(|sets| sets.get(label))
            .map(|mf| mf.membership(x))
            .unwrap_or(0.0)
    }

    fn rule_fire(&self, rule: &Rule, features: &Features) -> f64 {
        let mut fire = 1.0;
        for (variable, label) in &rule.conditions {
            let x = features.get(variable);
            fire = f64::min(fire, self.membership(variable, label, x));
        }
        fire
    }

    /// Trigger probability in `[0, 1]`, aggregated as the weighted maximum over the
    /// trigger bank.
    pub fn trigger_probability(&self, features: &Features) -> f64 {
        let mut best: f64 = 0.0;
        for rule in &self.rules_trigger {
            let fire = self.rule_fire(rule, features);
            best = best.max(fire * rule.weight.clamp(0.0, 1.0));
        }
        best.clamp(0.0, 1.0)
    }

    /// Imposed green duration: minimum green plus the fired extend contributions,
    /// clamped to `[min_green, max_green]`.
    pub fn extend_seconds(&self, features: &Features) -> f64 {
        let mut seconds = self.min_green;
        for rule in &self.rules_extend {
            let fire = self.rule_fire(rule, features);
            seconds += (fire * rule.weight).max(0.0);
        }
        seconds.clamp(self.min_green, self.max_green)
    }
}

fn labelled<const N: usize>(sets: [(&str, TriMf); N]) -> HashMap<String, TriMf> {
    sets.into_iter()
        .map(|(label, mf)| (label.to_string(), mf))
        .collect()
}

fn default_weight() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct IoRule {
    #[serde(rename = "if")]
    conditions: HashMap<String, String>,
    #[serde(default = "default_weight")]
    w: f64,
}

#[derive(Debug, Deserialize)]
struct IoFuzzyModel {
    min_green: Option<f64>,
    max_green: Option<f64>,
    #[serde(default)]
    fuzzy_sets: HashMap<String, HashMap<String, [f64; 3]>>,
    #[serde(default)]
    rules_trigger: Vec<IoRule>,
    #[serde(default)]
    rules_extend: Vec<IoRule>,
    #[serde(default)]
    params: HashMap<String, f64>,
}

impl From<IoFuzzyModel> for FuzzyModel {
    fn from(io_model: IoFuzzyModel) -> Self {
        let mut model = FuzzyModel::default();

        if !io_model.fuzzy_sets.is_empty() {
            model.fuzzy_sets = io_model
                .fuzzy_sets
                .into_iter()
                .map(|(variable, sets)| {
                    let sets = sets
                        .into_iter()
                        .map(|(label, [a, b, c])| (label, TriMf::new(a, b, c)))
                        .collect();
                    (variable, sets)
                })
                .collect();
        }
        if !io_model.rules_trigger.is_empty() {
            model.rules_trigger = convert_rules(io_model.rules_trigger);
        }
        if !io_model.rules_extend.is_empty() {
            model.rules_extend = convert_rules(io_model.rules_extend);
        }
        if let Some(min_green) = io_model.min_green {
            model.min_green = min_green;
        }
        if let Some(max_green) = io_model.max_green {
            model.max_green = max_green;
        }
        if let Some(&value) = io_model.params.get("trigger_threshold") {
            model.params.trigger_threshold = value;
        }
        if let Some(&value) = io_model.params.get("near_force_distance_m") {
            model.params.near_force_distance_m = value;
        }
        if let Some(&value) = io_model.params.get("release_distance_m") {
            model.params.release_distance_m = value;
        }
        model
    }
}

fn convert_rules(io_rules: Vec<IoRule>) -> Vec<Rule> {
    io_rules
        .into_iter()
        .map(|rule| Rule {
            conditions: rule.conditions.into_iter().collect(),
            weight: rule.w,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;

    use super::{Features, FuzzyModel, TriMf};

    #[test]
    fn membership_is_bounded_and_peaks_at_b() {
        let mf = TriMf::new(2.0, 6.0, 10.0);
        for step in 0..=140 {
            let x = step as f64 * 0.1;
            let mu = mf.membership(x);
            assert!((0.0..=1.0).contains(&mu), "mu({x}) out of range");
        }
        assert_approx_eq!(1.0, mf.membership(6.0));
        assert_approx_eq!(0.5, mf.membership(4.0));
        assert_approx_eq!(0.5, mf.membership(8.0));
        assert_approx_eq!(0.0, mf.membership(2.0));
        assert_approx_eq!(0.0, mf.membership(10.0));
        assert_approx_eq!(0.0, mf.membership(-3.0));
        assert_approx_eq!(0.0, mf.membership(25.0));
    }

    fn features(dist: f64, eta: f64) -> Features {
        Features {
            dist_to_tls: dist,
            ambulance_speed: 7.0,
            queue_length: 0.0,
            eta_seconds: eta,
            phase_index: 0.0,
            phase_remaining: 2.0,
        }
    }

    #[test]
    fn near_and_soon_fires_fully() {
        let model = FuzzyModel::default();
        // mu_near(30) = 1, mu_soon(4) = 1, rule weight 1.0
        assert_approx_eq!(1.0, model.trigger_probability(&features(30.0, 4.0)));
    }

    #[test]
    fn trigger_monotone_as_distance_shrinks() {
        let model = FuzzyModel::default();
        let mut previous = 0.0;
        for dist in [450.0, 300.0, 180.0, 120.0, 60.0, 30.0] {
            let p = model.trigger_probability(&features(dist, 4.0));
            assert!(
                p >= previous - 1e-12,
                "p({dist}) = {p} must not drop below {previous}"
            );
            previous = p;
        }
    }

    #[test]
    fn trigger_probability_stays_in_unit_interval() {
        let model = FuzzyModel::default();
        for dist in [0.0, 10.0, 100.0, 1000.0, f64::INFINITY] {
            for eta in [0.0, 5.0, 50.0] {
                let p = model.trigger_probability(&features(dist, eta));
                assert!((0.0..=1.0).contains(&p));
            }
        }
    }

    #[test]
    fn extend_clamped_to_green_window() {
        let model = FuzzyModel::default();
        // every extend rule firing at once cannot exceed max_green
        let all_in = Features {
            dist_to_tls: 30.0,
            ambulance_speed: 2.0,
            queue_length: 60.0,
            eta_seconds: 4.0,
            phase_index: 0.0,
            phase_remaining: 1.0,
        };
        let seconds = model.extend_seconds(&all_in);
        assert!(seconds <= model.max_green);

        // nothing firing yields exactly the minimum green
        let nothing = Features {
            dist_to_tls: 1000.0,
            ambulance_speed: 7.0,
            queue_length: 0.0,
            eta_seconds: 100.0,
            phase_index: 0.0,
            phase_remaining: 6.0,
        };
        assert_approx_eq!(model.min_green, model.extend_seconds(&nothing));
    }

    #[test]
    fn model_file_overrides_merge_into_defaults() {
        let json = r#"{
            "min_green": 4.0,
            "rules_trigger": [ { "if": { "dist_to_tls": "near" }, "w": 0.6 } ],
            "params": { "trigger_threshold": 0.25 }
        }"#;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fuzzy.json");
        std::fs::write(&path, json).unwrap();

        let model = FuzzyModel::from_file(&path).unwrap();
        assert_approx_eq!(4.0, model.min_green);
        // untouched sections keep their defaults
        assert_approx_eq!(20.0, model.max_green);
        assert_approx_eq!(0.25, model.params.trigger_threshold);
        assert_approx_eq!(50.0, model.params.release_distance_m);

        // the single replaced trigger rule caps the probability at its weight
        assert_approx_eq!(0.6, model.trigger_probability(&features(30.0, 4.0)));
    }

    #[test]
    fn missing_model_file_is_an_error() {
        assert!(FuzzyModel::from_file(std::path::Path::new("missing.json")).is_err());
    }
}
