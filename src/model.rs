use serde::Deserialize;

// --- Net document ---

/// The editor's net document. Geometry, color sets and styling are
/// carried by the editor but ignored here.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase")]
pub struct PetriNetData {
    pub petri_nets: Vec<PetriNet>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    #[serde(default)]
    pub priorities: Vec<Priority>,
    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct PetriNet {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub places: Vec<Place>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    #[serde(default)]
    pub arcs: Vec<Arc>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Place {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub initial_marking: String, // Rhai expression, empty for no tokens
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub guard: String,
    #[serde(default)]
    pub time: String, // delay in ms, Rhai expression
    #[serde(default)]
    pub priority: String, // name of a priority level
    #[serde(default)]
    pub code_segment: String,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ArcKind {
    #[default]
    Normal,
    Inhibitor,
    Reset,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Arc {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub inscription: String,
    #[serde(default)]
    pub is_bidirectional: bool,
    #[serde(default)]
    pub arc_type: Option<ArcKind>,
}

impl Arc {
    pub fn kind(&self) -> ArcKind {
        self.arc_type.unwrap_or_default()
    }
}

// --- Declarations ---

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Variable {
    pub name: String,
    #[serde(default)]
    pub color_set: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Priority {
    pub name: String,
    pub level: i64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct FunctionDefinition {
    pub name: String,
    pub code: String,
}

/// Priority level used when a transition names none, unless the net
/// declares `P_NORMAL`.
pub const DEFAULT_PRIORITY_LEVEL: i64 = 1000;

impl PetriNetData {
    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.petri_nets.iter().flat_map(|net| net.transitions.iter())
    }

    pub fn places(&self) -> impl Iterator<Item = &Place> {
        self.petri_nets.iter().flat_map(|net| net.places.iter())
    }

    pub fn arcs(&self) -> impl Iterator<Item = &Arc> {
        self.petri_nets.iter().flat_map(|net| net.arcs.iter())
    }

    pub fn find_transition(&self, id: &str) -> Option<&Transition> {
        self.transitions().find(|t| t.id == id)
    }

    /// Input arcs of a transition paired with the place they read from.
    /// Bidirectional arcs count as input from either end.
    pub fn input_arcs<'a>(&'a self, transition_id: &'a str) -> impl Iterator<Item = (&'a Arc, &'a str)> {
        self.arcs().filter_map(move |arc| {
            if arc.target == transition_id {
                Some((arc, arc.source.as_str()))
            } else if arc.is_bidirectional && arc.source == transition_id {
                Some((arc, arc.target.as_str()))
            } else {
                None
            }
        })
    }

    /// Output arcs of a transition paired with the place they write to.
    /// Inhibitor and reset arcs never produce.
    pub fn output_arcs<'a>(&'a self, transition_id: &'a str) -> impl Iterator<Item = (&'a Arc, &'a str)> {
        self.arcs()
            .filter(|arc| arc.kind() == ArcKind::Normal)
            .filter_map(move |arc| {
                if arc.source == transition_id {
                    Some((arc, arc.target.as_str()))
                } else if arc.is_bidirectional && arc.target == transition_id {
                    Some((arc, arc.source.as_str()))
                } else {
                    None
                }
            })
    }

    pub fn priority_level(&self, transition: &Transition) -> i64 {
        let default_level = self.level_of("P_NORMAL").unwrap_or(DEFAULT_PRIORITY_LEVEL);
        if transition.priority.is_empty() {
            return default_level;
        }
        self.level_of(&transition.priority).unwrap_or(default_level)
    }

    fn level_of(&self, name: &str) -> Option<i64> {
        self.priorities.iter().find(|p| p.name == name).map(|p| p.level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn net() -> PetriNetData {
        serde_json::from_value(serde_json::json!({
            "petriNets": [{
                "id": "n1",
                "name": "Net",
                "places": [
                    { "id": "p1", "name": "P1", "colorSet": "INT", "initialMarking": "[1]",
                      "position": { "x": 0.0, "y": 0.0 } },
                    { "id": "p2", "name": "P2" }
                ],
                "transitions": [
                    { "id": "t1", "name": "T1", "priority": "P_HIGH" },
                    { "id": "t2", "name": "T2" }
                ],
                "arcs": [
                    { "id": "a1", "source": "p1", "target": "t1", "inscription": "x" },
                    { "id": "a2", "source": "t1", "target": "p2", "inscription": "x" },
                    { "id": "a3", "source": "p2", "target": "t2", "isBidirectional": true },
                    { "id": "a4", "source": "p1", "target": "t2", "arcType": "inhibitor" }
                ]
            }],
            "colorSets": [],
            "priorities": [
                { "id": "pr1", "name": "P_HIGH", "level": 100 },
                { "id": "pr2", "name": "P_NORMAL", "level": 1000 }
            ]
        }))
        .expect("net parses")
    }

    #[test]
    fn unknown_editor_fields_are_ignored() {
        let net = net();
        assert_eq!(net.places().count(), 2);
        assert_eq!(net.places().next().map(|p| p.initial_marking.as_str()), Some("[1]"));
    }

    #[test]
    fn bidirectional_arcs_are_both_input_and_output() {
        let net = net();
        let inputs: Vec<_> = net.input_arcs("t2").map(|(a, p)| (a.id.as_str(), p)).collect();
        let outputs: Vec<_> = net.output_arcs("t2").map(|(a, p)| (a.id.as_str(), p)).collect();
        assert_eq!(inputs, vec![("a3", "p2"), ("a4", "p1")]);
        assert_eq!(outputs, vec![("a3", "p2")]);
    }

    #[test]
    fn priority_falls_back_to_normal_level() {
        let net = net();
        let t1 = net.find_transition("t1").expect("t1");
        let t2 = net.find_transition("t2").expect("t2");
        assert_eq!(net.priority_level(t1), 100);
        assert_eq!(net.priority_level(t2), 1000);
    }

    #[test]
    fn arc_kind_defaults_to_normal() {
        let net = net();
        let kinds: Vec<_> = net.arcs().map(|a| a.kind()).collect();
        assert_eq!(
            kinds,
            vec![ArcKind::Normal, ArcKind::Normal, ArcKind::Normal, ArcKind::Inhibitor]
        );
    }
}
