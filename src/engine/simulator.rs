use std::collections::{HashMap, HashSet};

use itertools::Itertools;
use rand::prelude::*;
use rand::rngs::StdRng;
use rhai::{Dynamic, Engine, EvalAltResult, Module, Scope, AST};
use tracing::{debug, warn};

use super::{EnabledTransition, EngineError, EngineInitError, Firing, Marking, NetEngine};
use crate::model::{Arc, ArcKind, PetriNetData, Transition};

type Tokens = Vec<Dynamic>;

// Variable assignment plus the concrete tokens it takes from each place.
#[derive(Debug, Clone, Default)]
struct Binding {
    variables: HashMap<String, Dynamic>,
    consumed: HashMap<String, Tokens>,
    reset_places: Vec<String>,
}

impl Binding {
    fn consuming(mut self, place_id: &str, tokens: impl IntoIterator<Item = Dynamic>) -> Self {
        self.consumed
            .entry(place_id.to_string())
            .or_default()
            .extend(tokens);
        self
    }

    fn scope(&self) -> Scope<'static> {
        let mut scope = Scope::new();
        for (name, value) in &self.variables {
            scope.push_dynamic(name.as_str(), value.clone());
        }
        scope
    }
}

/// Rhai-evaluated colored Petri net.
///
/// Bound variables are ordinary scope variables during a firing: a code
/// segment may reassign them, and output arcs see the new values.
pub struct Simulator {
    net: PetriNetData,
    engine: Engine,
    guards: HashMap<String, AST>,
    inscriptions: HashMap<String, AST>,
    delays: HashMap<String, AST>,
    code_segments: HashMap<String, AST>,
    variables: HashSet<String>,
    initial_marking: HashMap<String, Tokens>,
    marking: HashMap<String, Tokens>,
    current_time: i64,
    rng: StdRng,
}

impl Simulator {
    pub fn new(net: PetriNetData) -> Result<Self, EngineInitError> {
        let mut engine = Engine::new();
        validate_structure(&net)?;

        let variables: HashSet<String> = net.variables.iter().map(|v| v.name.clone()).collect();
        debug!(?variables, "declared variables");

        // All functions go into one module so they can call each other.
        let fn_code = net.functions.iter().map(|f| f.code.as_str()).join("\n");
        if !fn_code.trim().is_empty() {
            debug!(count = net.functions.len(), "compiling functions");
            let ast = engine
                .compile(&fn_code)
                .map_err(|e| EngineInitError::new(format!("failed to compile functions: {e}")))?;
            let module = Module::eval_ast_as_new(Scope::new(), &ast, &engine)
                .map_err(|e| EngineInitError::new(format!("failed to load functions: {e}")))?;
            engine.register_global_module(module.into());
        }

        let mut guards = HashMap::new();
        let mut delays = HashMap::new();
        let mut code_segments = HashMap::new();
        for transition in net.transitions() {
            let guard = transition.guard.trim();
            if !guard.is_empty() && !guard.eq_ignore_ascii_case("true") {
                guards.insert(
                    transition.id.clone(),
                    compile(&engine, guard, || format!("guard of {}", transition.name))?,
                );
            }
            if !transition.time.trim().is_empty() {
                delays.insert(
                    transition.id.clone(),
                    compile(&engine, &transition.time, || format!("time of {}", transition.name))?,
                );
            }
            if !transition.code_segment.trim().is_empty() {
                code_segments.insert(
                    transition.id.clone(),
                    compile(&engine, &transition.code_segment, || {
                        format!("code segment of {}", transition.name)
                    })?,
                );
            }
        }

        let mut inscriptions = HashMap::new();
        for arc in net.arcs() {
            let inscription = arc.inscription.trim();
            if inscription.is_empty() {
                continue;
            }
            // Plain variables are compiled too; output arcs evaluate them.
            let ast = engine.compile_expression(inscription).map_err(|e| {
                EngineInitError::new(format!("failed to compile inscription of arc {}: {e}", arc.id))
            })?;
            inscriptions.insert(arc.id.clone(), ast);
        }

        let mut initial_marking = HashMap::new();
        for place in net.places() {
            let expression = place.initial_marking.trim();
            let tokens = if expression.is_empty() || expression == "[]" {
                Vec::new()
            } else {
                let value = engine
                    .eval_expression::<Dynamic>(expression)
                    .map_err(|e| {
                        EngineInitError::new(format!(
                            "failed to evaluate initial marking of place {}: {e}",
                            place.name
                        ))
                    })?;
                into_tokens(value)
            };
            debug!(place = %place.name, ?tokens, "initial marking");
            initial_marking.insert(place.id.clone(), tokens);
        }

        Ok(Simulator {
            marking: initial_marking.clone(),
            net,
            engine,
            guards,
            inscriptions,
            delays,
            code_segments,
            variables,
            initial_marking,
            current_time: 0,
            rng: StdRng::from_os_rng(),
        })
    }

    /// Fixes the choice among equally prioritized bindings.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Caps the Rhai operations per evaluation; zero lifts the cap.
    pub fn with_max_operations(mut self, max_operations: u64) -> Self {
        self.engine.set_max_operations(max_operations);
        self
    }

    fn is_variable(&self, inscription: &str) -> bool {
        self.variables.contains(inscription.trim())
    }

    fn tokens_in(&self, place_id: &str) -> &[Dynamic] {
        self.marking.get(place_id).map(Vec::as_slice).unwrap_or(&[])
    }

    fn bindings_for(&self, transition: &Transition) -> Vec<Binding> {
        let mut inputs: Vec<(&Arc, &str)> = self.net.input_arcs(&transition.id).collect();
        // Variable arcs bind first so expression arcs can refer to them.
        inputs.sort_by_key(|(arc, _)| !self.is_variable(&arc.inscription));

        let mut bindings = vec![Binding::default()];
        for (arc, place_id) in inputs {
            bindings = bindings
                .into_iter()
                .flat_map(|binding| self.extend_binding(binding, arc, place_id))
                .collect();
            if bindings.is_empty() {
                return bindings;
            }
        }

        bindings.retain(|binding| self.guard_holds(transition, binding));
        bindings
    }

    fn extend_binding(&self, binding: Binding, arc: &Arc, place_id: &str) -> Vec<Binding> {
        let tokens = self.tokens_in(place_id);
        match arc.kind() {
            ArcKind::Inhibitor => {
                if tokens.is_empty() {
                    vec![binding]
                } else {
                    Vec::new()
                }
            }
            ArcKind::Reset => {
                let mut binding = binding;
                binding.reset_places.push(place_id.to_string());
                vec![binding]
            }
            ArcKind::Normal => {
                let taken = binding.consumed.get(place_id).map(Vec::as_slice).unwrap_or(&[]);
                let available = remove_tokens(tokens, taken).unwrap_or_default();
                let inscription = arc.inscription.trim();

                if inscription.is_empty() {
                    // Test arc: needs a token, takes none.
                    return if available.is_empty() { Vec::new() } else { vec![binding] };
                }

                if self.is_variable(inscription) {
                    if let Some(bound) = binding.variables.get(inscription) {
                        let key = token_key(bound);
                        return match available.iter().find(|t| token_key(t) == key) {
                            Some(token) => vec![binding.clone().consuming(place_id, [token.clone()])],
                            None => Vec::new(),
                        };
                    }
                    return available
                        .iter()
                        .unique_by(|t| token_key(t))
                        .map(|token| {
                            let mut next = binding.clone().consuming(place_id, [token.clone()]);
                            next.variables.insert(inscription.to_string(), token.clone());
                            next
                        })
                        .collect();
                }

                let Some(ast) = self.inscriptions.get(&arc.id) else {
                    return Vec::new();
                };
                let mut scope = binding.scope();
                let required = match self.engine.eval_ast_with_scope::<Dynamic>(&mut scope, ast) {
                    Ok(value) => into_tokens(value),
                    Err(e) => {
                        warn!(arc = %arc.id, error = %e, "input inscription failed to evaluate");
                        return Vec::new();
                    }
                };
                if remove_tokens(&available, &required).is_some() {
                    vec![binding.consuming(place_id, required)]
                } else {
                    Vec::new()
                }
            }
        }
    }

    fn guard_holds(&self, transition: &Transition, binding: &Binding) -> bool {
        let Some(ast) = self.guards.get(&transition.id) else {
            return true;
        };
        let mut scope = binding.scope();
        match self.engine.eval_ast_with_scope::<bool>(&mut scope, ast) {
            Ok(result) => result,
            Err(e) => {
                warn!(transition = %transition.name, error = %e, "guard failed to evaluate");
                false
            }
        }
    }

    fn fire_binding(&mut self, transition_id: &str, binding: Binding) -> Result<Firing, EngineError> {
        let transition_name = self
            .net
            .find_transition(transition_id)
            .map(|t| t.name.clone())
            .ok_or_else(|| EngineError::NotEnabled(transition_id.to_string()))?;

        // Work on a copy so a failing output leaves the marking untouched.
        let mut marking = self.marking.clone();
        let mut consumed = Marking::new();

        for (place_id, tokens) in &binding.consumed {
            let pool = marking.get(place_id).map(Vec::as_slice).unwrap_or(&[]);
            let remaining = remove_tokens(pool, tokens).ok_or_else(|| EngineError::Evaluation {
                context: format!("input place {place_id}"),
                message: "bound tokens are no longer in the marking".into(),
            })?;
            marking.insert(place_id.clone(), remaining);
            consumed
                .entry(place_id.clone())
                .or_default()
                .extend(tokens.iter().map(to_json));
        }
        for place_id in &binding.reset_places {
            if let Some(tokens) = marking.get_mut(place_id) {
                consumed
                    .entry(place_id.clone())
                    .or_default()
                    .extend(tokens.drain(..).map(|t| to_json(&t)));
            }
        }

        let mut scope = binding.scope();
        if let Some(ast) = self.code_segments.get(transition_id) {
            self.engine
                .run_ast_with_scope(&mut scope, ast)
                .map_err(|e| evaluation_error(format!("code segment of {transition_name}"), &e))?;
        }

        let delay = match self.delays.get(transition_id) {
            Some(ast) => self
                .engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
                .map_err(|e| evaluation_error(format!("time of {transition_name}"), &e))?
                .as_int()
                .map_err(|type_name| EngineError::Evaluation {
                    context: format!("time of {transition_name}"),
                    message: format!("expected an integer delay, got {type_name}"),
                })?,
            None => 0,
        };
        let current_time = self
            .current_time
            .checked_add(delay.max(0))
            .ok_or_else(|| EngineError::Evaluation {
                context: format!("time of {transition_name}"),
                message: format!("delay {delay} overflows simulation time {}", self.current_time),
            })?;

        let mut produced = Marking::new();
        for (arc, place_id) in self.net.output_arcs(transition_id) {
            let Some(ast) = self.inscriptions.get(&arc.id) else {
                continue;
            };
            let value = self
                .engine
                .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
                .map_err(|e| evaluation_error(format!("output arc {}", arc.id), &e))?;
            let tokens = into_tokens(value);
            if tokens.is_empty() {
                continue;
            }
            produced
                .entry(place_id.to_string())
                .or_default()
                .extend(tokens.iter().map(to_json));
            marking.entry(place_id.to_string()).or_default().extend(tokens);
        }

        self.marking = marking;
        self.current_time = current_time;
        debug!(
            transition = %transition_name,
            variables = ?binding.variables,
            time = self.current_time,
            "fired"
        );

        Ok(Firing {
            transition_id: transition_id.to_string(),
            transition_name,
            simulation_time: self.current_time,
            consumed,
            produced,
        })
    }
}

impl NetEngine for Simulator {
    fn enabled_transitions(&self) -> Result<Vec<EnabledTransition>, EngineError> {
        Ok(self
            .net
            .transitions()
            .filter(|t| !self.bindings_for(t).is_empty())
            .map(|t| EnabledTransition {
                transition_id: t.id.clone(),
                transition_name: t.name.clone(),
            })
            .collect())
    }

    fn fire(&mut self, transition_id: &str) -> Result<Firing, EngineError> {
        let transition = self
            .net
            .find_transition(transition_id)
            .ok_or_else(|| EngineError::NotEnabled(transition_id.to_string()))?;
        let mut bindings = self.bindings_for(transition);
        if bindings.is_empty() {
            return Err(EngineError::NotEnabled(transition_id.to_string()));
        }
        let binding = bindings.swap_remove(self.rng.random_range(0..bindings.len()));
        self.fire_binding(transition_id, binding)
    }

    fn step_any(&mut self) -> Result<Firing, EngineError> {
        let candidates: Vec<(String, i64, Binding)> = self
            .net
            .transitions()
            .flat_map(|t| {
                let level = self.net.priority_level(t);
                self.bindings_for(t)
                    .into_iter()
                    .map(move |binding| (t.id.clone(), level, binding))
            })
            .collect();

        let mut best = candidates.into_iter().min_set_by_key(|(_, level, _)| *level);
        if best.is_empty() {
            debug!("no enabled bindings");
            return Err(EngineError::NoEnabledTransition);
        }
        let (transition_id, _, binding) = best.swap_remove(self.rng.random_range(0..best.len()));
        self.fire_binding(&transition_id, binding)
    }

    fn reset(&mut self) {
        self.marking = self.initial_marking.clone();
        self.current_time = 0;
    }

    fn marking(&self) -> Marking {
        self.marking
            .iter()
            .map(|(place_id, tokens)| (place_id.clone(), tokens.iter().map(to_json).collect()))
            .collect()
    }

    fn current_time(&self) -> i64 {
        self.current_time
    }
}

fn validate_structure(net: &PetriNetData) -> Result<(), EngineInitError> {
    let places: HashSet<&str> = net.places().map(|p| p.id.as_str()).collect();
    let transitions: HashSet<&str> = net.transitions().map(|t| t.id.as_str()).collect();
    for arc in net.arcs() {
        let connects = (places.contains(arc.source.as_str()) && transitions.contains(arc.target.as_str()))
            || (transitions.contains(arc.source.as_str()) && places.contains(arc.target.as_str()));
        if !connects {
            return Err(EngineInitError::new(format!(
                "arc {} must connect a place and a transition ({} -> {})",
                arc.id, arc.source, arc.target
            )));
        }
    }
    Ok(())
}

fn compile(engine: &Engine, script: &str, what: impl Fn() -> String) -> Result<AST, EngineInitError> {
    engine
        .compile(script)
        .map_err(|e| EngineInitError::new(format!("failed to compile {}: {e}", what())))
}

fn evaluation_error(context: String, error: &EvalAltResult) -> EngineError {
    EngineError::Evaluation {
        context,
        message: error.to_string(),
    }
}

// Arrays are multisets, unit is empty, anything else is one token.
fn into_tokens(value: Dynamic) -> Tokens {
    if value.is_unit() {
        Vec::new()
    } else if value.is_array() {
        value.into_typed_array::<Dynamic>().unwrap_or_default()
    } else {
        vec![value]
    }
}

fn token_key(token: &Dynamic) -> String {
    format!("{}:{}", token.type_name(), token)
}

/// `pool` minus one occurrence of each of `taken`, or `None` if some are missing.
fn remove_tokens(pool: &[Dynamic], taken: &[Dynamic]) -> Option<Tokens> {
    let mut remaining = pool.to_vec();
    for token in taken {
        let key = token_key(token);
        let position = remaining.iter().position(|t| token_key(t) == key)?;
        remaining.remove(position);
    }
    Some(remaining)
}

fn to_json(token: &Dynamic) -> serde_json::Value {
    rhai::serde::from_dynamic::<serde_json::Value>(token)
        .unwrap_or_else(|_| serde_json::Value::String(token.to_string()))
}
