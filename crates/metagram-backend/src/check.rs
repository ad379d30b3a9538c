use std::collections::HashSet;

use cranelift_entity::{EntitySet, PrimaryMap, SecondaryMap};
use log::warn;
use metagram_runtime::grammar::{Action, Pattern, Rule, RuleHandle};

use crate::{error::ErrorAccumulator, span::Span};

/// Whether each rule can succeed without consuming input, computed as a fixpoint.
pub fn nullable_rules(rules: &PrimaryMap<RuleHandle, Rule>) -> SecondaryMap<RuleHandle, bool> {
    let mut nullable: SecondaryMap<RuleHandle, bool> = SecondaryMap::with_capacity(rules.len());
    loop {
        let mut changed = false;
        for (handle, rule) in rules.iter() {
            if !nullable[handle] && is_nullable(&rule.pattern, &nullable) {
                nullable[handle] = true;
                changed = true;
            }
        }
        if !changed {
            return nullable;
        }
    }
}

fn is_nullable(pattern: &Pattern, rules: &SecondaryMap<RuleHandle, bool>) -> bool {
    match pattern {
        // a `str` leaf consumes at least the line terminator, numbers at least a digit
        Pattern::Leaf(_) => false,
        Pattern::Literal(text) => text.is_empty(),
        Pattern::Sequence(sequence) | Pattern::Action(Action { sequence, .. }) => {
            sequence.fields.iter().all(|f| is_nullable(&f.pattern, rules))
        }
        Pattern::Repeat(_) | Pattern::Not(_) => true,
        Pattern::Choice(alternatives) => alternatives.iter().any(|a| is_nullable(a, rules)),
        Pattern::Rule(r) => rules[r.rule],
    }
}

/// Repetition of something which can match empty input stops after the first iteration.
pub fn warn_nullable_repeats(
    rules: &PrimaryMap<RuleHandle, Rule>,
    nullable: &SecondaryMap<RuleHandle, bool>,
) {
    fn visit(pattern: &Pattern, rule: &Rule, nullable: &SecondaryMap<RuleHandle, bool>) {
        match pattern {
            Pattern::Repeat(inner) => {
                if is_nullable(inner, nullable) {
                    warn!("Rule `{}` repeats a pattern which can match empty input", rule.name);
                }
                visit(inner, rule, nullable);
            }
            Pattern::Sequence(sequence) | Pattern::Action(Action { sequence, .. }) => {
                for field in &sequence.fields {
                    visit(&field.pattern, rule, nullable);
                }
            }
            Pattern::Choice(alternatives) => {
                for a in alternatives {
                    visit(a, rule, nullable);
                }
            }
            Pattern::Not(inner) => visit(inner, rule, nullable),
            Pattern::Leaf(_) | Pattern::Literal(_) | Pattern::Rule(_) => {}
        }
    }

    for (_, rule) in rules.iter() {
        visit(&rule.pattern, rule, nullable);
    }
}

pub fn check_left_recursion(
    rules: &PrimaryMap<RuleHandle, Rule>,
    spans: &SecondaryMap<RuleHandle, Span>,
    nullable: &SecondaryMap<RuleHandle, bool>,
    err: &ErrorAccumulator,
) {
    let mut prefix_rules: SecondaryMap<RuleHandle, Vec<RuleHandle>> = SecondaryMap::new();
    for (handle, rule) in rules.iter() {
        let mut set = Vec::new();
        collect_prefix_rules(&rule.pattern, nullable, &mut set);
        prefix_rules[handle] = set;
    }

    let mut visited = EntitySet::new();
    let mut reported = HashSet::new();
    let mut stack = Vec::new();
    for (handle, _) in rules.iter() {
        find_prefix_cycles(
            handle,
            &prefix_rules,
            &mut visited,
            &mut stack,
            &mut reported,
            rules,
            spans,
            err,
        );
    }
}

/// Collects the rules which may be entered before any input is consumed, returns whether
/// `pattern` is nullable.
fn collect_prefix_rules(
    pattern: &Pattern,
    nullable: &SecondaryMap<RuleHandle, bool>,
    rules: &mut Vec<RuleHandle>,
) -> bool {
    match pattern {
        Pattern::Sequence(sequence) | Pattern::Action(Action { sequence, .. }) => {
            for field in &sequence.fields {
                if !collect_prefix_rules(&field.pattern, nullable, rules) {
                    return false;
                }
            }
            true
        }
        Pattern::Choice(alternatives) => {
            let mut any = false;
            for a in alternatives {
                any |= collect_prefix_rules(a, nullable, rules);
            }
            any
        }
        Pattern::Repeat(inner) | Pattern::Not(inner) => {
            collect_prefix_rules(inner, nullable, rules);
            true
        }
        Pattern::Rule(r) => {
            if !rules.contains(&r.rule) {
                rules.push(r.rule);
            }
            nullable[r.rule]
        }
        Pattern::Leaf(_) => false,
        Pattern::Literal(text) => text.is_empty(),
    }
}

#[allow(clippy::too_many_arguments)]
fn find_prefix_cycles(
    handle: RuleHandle,

    prefix_rules: &SecondaryMap<RuleHandle, Vec<RuleHandle>>,
    visited: &mut EntitySet<RuleHandle>,
    stack: &mut Vec<RuleHandle>,
    reported: &mut HashSet<RuleHandle>,

    rules: &PrimaryMap<RuleHandle, Rule>,
    spans: &SecondaryMap<RuleHandle, Span>,
    err: &ErrorAccumulator,
) {
    if let Some(position) = stack.iter().position(|&rule| rule == handle) {
        //      /position
        // A -> B -> C -> D
        //      ↑________|
        let cycle = &stack[position..];
        if reported.insert(handle) {
            let mut path = String::new();
            for &rule in cycle.iter().chain(std::iter::once(&handle)) {
                if !path.is_empty() {
                    path.push_str(" -> ");
                }
                path.push_str(&rules[rule].name);
            }
            err.error(spans[handle], format_args!("Left recursion: {path}"));
        }
        return;
    }

    if visited.contains(handle) {
        return;
    }
    visited.insert(handle);

    stack.push(handle);
    for &next in &prefix_rules[handle] {
        find_prefix_cycles(next, prefix_rules, visited, stack, reported, rules, spans, err);
    }
    stack.pop();
}

#[cfg(test)]
mod tests {
    use crate::{error::ErrorAccumulator, parser::parse, resolve::lower};

    use super::*;

    fn check(src: &str) -> Vec<String> {
        let file = parse(src).unwrap();
        let err = ErrorAccumulator::new();
        let lowered = lower(&file, &err);
        let nullable = nullable_rules(&lowered.rules);
        check_left_recursion(&lowered.rules, &lowered.spans, &nullable, &err);
        err.into_diagnostics(src)
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn test_left_recursion() {
        assert_eq!(
            check("meta { a := [b, \"x\"]; b := (a | \"y\"); --- a }"),
            vec!["Left recursion: a -> b -> a"]
        );
        // the empty repetition lets `c` reach its own start
        assert_eq!(
            check("meta { c := [repeat \"x\", !\"y\", c]; --- c }"),
            vec!["Left recursion: c -> c"]
        );
        assert!(check("meta { a := [\"(\", a, \")\"] | \"x\"; --- a }").is_empty());
    }

    #[test]
    fn test_nullable() {
        let file = parse("meta { a := repeat str; b := [a, a]; c := [b, str]; d := (c | b); --- d }").unwrap();
        let err = ErrorAccumulator::new();
        let lowered = lower(&file, &err);
        let nullable = nullable_rules(&lowered.rules);
        let values: Vec<bool> = lowered.rules.keys().map(|h| nullable[h]).collect();
        assert_eq!(values, vec![true, true, false, true]);
    }
}
