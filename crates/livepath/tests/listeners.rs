//! Live paths: initial notification, incremental updates and teardown.
mod common;

use std::collections::HashSet;
use std::sync::Arc;

use common::{Change, Recorder, total_observers};
use livepath::{Context, Error, ListenerError, Node, Path, PathListener, PathNode, elem};
use parking_lot::Mutex;
use rstest::rstest;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

fn added(step: usize, items: &[&str]) -> Change {
    Change::Added(step, strings(items))
}

fn removed(step: usize, items: &[&str]) -> Change {
    Change::Removed(step, strings(items))
}

fn listen(root: &Node, source: &str) -> (Arc<Recorder>, livepath::ListenerHandle) {
    let recorder = Arc::new(Recorder::default());
    let path = livepath::compile(source).unwrap();
    let handle = path.add_listener(Context::new(root), recorder.clone()).unwrap();
    (recorder, handle)
}

#[test]
fn reports_every_layer_while_the_tree_changes() {
    let root = elem("r").child(elem("a").attr("id", "1")).build();
    let first = root.children()[0].clone();
    let (recorder, handle) = listen(&root, "child::a/child::b");

    assert_eq!(recorder.take_changes(), [added(1, &["a#1"]), added(2, &[])]);

    first.add_child(elem("b").build());
    assert_eq!(recorder.take_changes(), [added(2, &["b"])]);

    root.add_child(elem("a").attr("id", "2").child(elem("b").attr("id", "x")).build());
    assert_eq!(recorder.take_changes(), [added(1, &["a#2"]), added(2, &["b#x"])]);

    first.remove_from_parent();
    assert_eq!(recorder.take_changes(), [removed(2, &["b"]), removed(1, &["a#1"])]);
    assert_eq!(recorder.results(), ["b#x"]);

    handle.remove();
    assert_eq!(recorder.take_changes(), [removed(2, &["b#x"]), removed(1, &["a#2"])]);
    assert_eq!(total_observers(&root), 0);
    assert_eq!(total_observers(&first), 0);
}

#[test]
fn unrelated_mutations_are_silent() {
    let root = elem("r").child(elem("a")).child(elem("c")).build();
    let (recorder, _handle) = listen(&root, "a/b");
    recorder.take_changes();

    root.children()[1].add_child(elem("b").build());
    root.children()[0].set_attribute("k", "v");
    root.set_value(Some("text".to_owned()));

    assert!(recorder.take_changes().is_empty());
}

#[test]
fn nested_and_descendant_differ_on_nested_matches() {
    let build = || {
        elem("r")
            .child(elem("x").attr("id", "1").child(elem("x").attr("id", "2").child(elem("x").attr("id", "3"))))
            .build()
    };
    let root = build();
    let outer = root.children()[0].clone();
    let middle = outer.children()[0].clone();

    let (descendant, _d) = listen(&root, "descendant::x");
    let (nested, _n) = listen(&root, "nested::x");
    assert_eq!(descendant.results(), ["x#1", "x#2", "x#3"]);
    assert_eq!(nested.results(), ["x#1"]);
    descendant.take_changes();
    nested.take_changes();

    middle.add_child(elem("x").attr("id", "4").build());
    assert_eq!(descendant.take_changes(), [added(1, &["x#4"])]);
    assert!(nested.take_changes().is_empty());

    outer.remove_from_parent();
    assert!(descendant.results().is_empty());
    assert!(nested.results().is_empty());

    root.add_child(elem("y").child(middle.clone()).build());
    assert_eq!(nested.take_changes().last(), Some(&added(1, &["x#2"])));
    let mut found = descendant.results();
    found.sort();
    assert_eq!(found, ["x#2", "x#3", "x#4"]);
}

#[test]
fn predicates_follow_attribute_changes() {
    let root = elem("r").child(elem("a").attr("id", "1")).child(elem("a").attr("id", "2")).build();
    let second = root.children()[1].clone();
    let (recorder, _handle) = listen(&root, "a[@state = 'open']/@id");
    // empty intermediate layers stay silent, the result is always reported
    assert_eq!(recorder.take_changes(), [added(2, &[])]);

    second.set_attribute("state", "open");
    assert_eq!(recorder.take_changes(), [added(1, &["a#2"]), added(2, &["@id=2"])]);

    second.set_attribute("state", "closed");
    assert_eq!(recorder.take_changes(), [removed(2, &["@id=2"]), removed(1, &["a#2"])]);
}

#[test]
fn predicates_follow_changes_below_the_candidate() {
    let root = elem("r").child(elem("a").child(elem("b"))).build();
    let a = root.children()[0].clone();
    let b = a.children()[0].clone();
    let (recorder, _handle) = listen(&root, "a[b/@k = '1']");
    assert!(recorder.results().is_empty());

    b.set_attribute("k", "1");
    assert_eq!(recorder.results(), ["a"]);

    let c = elem("c").build();
    b.add_child(c.clone());
    c.add_child(elem("b").attr("k", "1").build());
    b.remove_attribute("k");
    assert!(recorder.results().is_empty());

    a.add_child(elem("b").attr("k", "1").build());
    assert_eq!(recorder.results(), ["a"]);
    a.remove_child(1);
    assert!(recorder.results().is_empty());
}

#[test]
fn predicates_follow_text_of_nested_paths() {
    let root = elem("r").child(elem("x").child(elem("c"))).build();
    let c = root.children()[0].children()[0].clone();
    let (recorder, handle) = listen(&root, "*[c/text()]");
    assert!(recorder.results().is_empty());

    c.set_value(Some("v".to_owned()));
    assert_eq!(recorder.results(), ["x"]);
    c.set_value(None);
    assert!(recorder.results().is_empty());

    drop(handle);
    assert_eq!(total_observers(&root), 0);
}

#[test]
fn positional_predicates_track_insertions() {
    let root = elem("r").child(elem("a").attr("id", "1")).child(elem("a").attr("id", "2")).build();
    let (recorder, _handle) = listen(&root, "a[1]");
    assert_eq!(recorder.results(), ["a#1"]);
    recorder.take_changes();

    root.insert_child(0, elem("a").attr("id", "0").build());
    assert_eq!(recorder.take_changes(), [removed(1, &["a#1"]), added(1, &["a#0"])]);
}

#[test]
fn text_nodes_appear_with_a_value() {
    let root = elem("r").child(elem("a")).build();
    let a = root.children()[0].clone();
    let (recorder, _handle) = listen(&root, "a/text()");
    assert!(recorder.results().is_empty());

    a.set_value(Some("hello".to_owned()));
    assert_eq!(recorder.results(), ["'hello'"]);
    a.set_value(None);
    assert!(recorder.results().is_empty());
}

#[rstest]
#[case("//a[@state = 'open']/following-sibling::*")]
#[case("a/ancestor-or-self::*")]
#[case("descendant::a/preceding::*[1]")]
#[case("nested::a/@*")]
#[case("/r/*[last()]/node()")]
fn unbinding_removes_every_observer(#[case] source: &str) {
    let root = elem("r")
        .child(elem("a").attr("state", "open").child(elem("a").value("v")))
        .child(elem("b").child(elem("a").attr("state", "closed")))
        .build();

    let (recorder, handle) = listen(&root, source);
    assert!(total_observers(&root) > 0, "{source} observes nothing");
    drop(handle);

    assert_eq!(total_observers(&root), 0, "{source}");
    assert!(recorder.results().is_empty(), "{source}");
}

#[test]
fn failing_listeners_do_not_break_the_chain() {
    let root = elem("r").child(elem("a")).build();
    let recorder = Arc::new(Recorder::failing());
    let path = livepath::compile("a").unwrap();
    let handle = path.add_listener(Context::new(&root), recorder.clone()).unwrap();

    root.add_child(elem("a").attr("id", "2").build());
    root.children()[0].remove_from_parent();

    assert_eq!(recorder.results(), ["a#2"]);
    assert_eq!(handle.results().len(), 1);
}

#[test]
fn undefined_variables_fail_before_binding() {
    let root = elem("r").child(elem("a").attr("id", "1")).build();
    let path = livepath::compile("a[@id = $wanted]").unwrap();
    let recorder = Arc::new(Recorder::default());

    match path.add_listener(Context::new(&root), recorder.clone()) {
        Err(Error::UndefinedVariable { name }) => assert_eq!(name, "wanted"),
        other => panic!("expected an undefined variable, got {other:?}"),
    }
    assert!(recorder.take_changes().is_empty());
    assert_eq!(total_observers(&root), 0);

    let context = Context::new(&root).with_variable("wanted", "1");
    let _handle = path.add_listener(context, recorder.clone()).unwrap();
    assert_eq!(recorder.results(), ["a#1"]);
}

/// Marks every reported node, which another live path picks up.
struct Marker;

impl PathListener for Marker {
    fn notify_added(&self, _: &Context, path: &Path, step: usize, nodes: &[PathNode]) -> Result<(), ListenerError> {
        if step == path.len() {
            for node in nodes.iter().filter_map(PathNode::as_element) {
                node.set_attribute("seen", "yes");
            }
        }
        Ok(())
    }

    fn notify_removed(&self, _: &Context, _: &Path, _: usize, _: &[PathNode]) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[test]
fn listeners_may_mutate_the_tree() {
    let root = elem("r").child(elem("a")).build();
    let (seen, _seen_handle) = listen(&root, "a[@seen]");
    let marker = livepath::compile("a").unwrap().add_listener(Context::new(&root), Arc::new(Marker)).unwrap();

    assert_eq!(seen.results(), ["a"]);
    root.add_child(elem("a").attr("id", "2").build());
    assert_eq!(seen.results(), ["a", "a#2"]);
    drop(marker);
}

#[derive(Default)]
struct Steps(Mutex<Vec<(usize, usize)>>);

impl PathListener for Steps {
    fn notify_added(&self, _: &Context, _: &Path, step: usize, nodes: &[PathNode]) -> Result<(), ListenerError> {
        self.0.lock().push((step, nodes.len()));
        Ok(())
    }

    fn notify_removed(&self, _: &Context, _: &Path, _: usize, _: &[PathNode]) -> Result<(), ListenerError> {
        Ok(())
    }
}

#[test]
fn shared_derivations_are_reported_once() {
    // both `a` elements lead to the same parent
    let root = elem("r").child(elem("a")).child(elem("a")).build();
    let steps = Arc::new(Steps::default());
    let _handle =
        livepath::compile("a/..").unwrap().add_listener(Context::new(&root), steps.clone()).unwrap();
    assert_eq!(*steps.0.lock(), [(1, 2), (2, 1)]);

    root.children()[0].remove_from_parent();
    root.add_child(elem("a").build());
    assert_eq!(steps.0.lock().len(), 3);
}

mod oracle {
    use super::*;
    use proptest::prelude::*;

    #[derive(Debug, Clone)]
    enum Edit {
        Add { parent: usize, name: usize },
        Remove { node: usize },
        Move { node: usize, parent: usize },
        SetAttribute { node: usize, value: usize },
        ClearAttribute { node: usize },
        SetValue { node: usize, value: Option<usize> },
    }

    const NAMES: [&str; 3] = ["a", "b", "c"];

    fn edit() -> impl Strategy<Value = Edit> {
        prop_oneof![
            (any::<usize>(), 0..NAMES.len()).prop_map(|(parent, name)| Edit::Add { parent, name }),
            any::<usize>().prop_map(|node| Edit::Remove { node }),
            (any::<usize>(), any::<usize>()).prop_map(|(node, parent)| Edit::Move { node, parent }),
            (any::<usize>(), 0..3usize).prop_map(|(node, value)| Edit::SetAttribute { node, value }),
            any::<usize>().prop_map(|node| Edit::ClearAttribute { node }),
            (any::<usize>(), proptest::option::of(0..2usize)).prop_map(|(node, value)| Edit::SetValue { node, value }),
        ]
    }

    fn apply(root: &Node, edit: &Edit) {
        let nodes = common::all_nodes(root);
        let pick = |index: usize| nodes[index % nodes.len()].clone();
        match *edit {
            Edit::Add { parent, name } => pick(parent).add_child(elem(NAMES[name]).build()),
            Edit::Remove { node } => {
                let node = pick(node);
                if node != *root {
                    node.remove_from_parent();
                }
            }
            Edit::Move { node, parent } => {
                let (node, parent) = (pick(node), pick(parent));
                if node != *root && node != parent && !node.is_ancestor_of(&parent) {
                    parent.add_child(node);
                }
            }
            Edit::SetAttribute { node, value } => {
                pick(node).set_attribute("k", value.to_string());
            }
            Edit::ClearAttribute { node } => {
                pick(node).remove_attribute("k");
            }
            Edit::SetValue { node, value } => {
                pick(node).set_value(value.map(|value| value.to_string()));
            }
        }
    }

    fn initial() -> Node {
        elem("r")
            .child(elem("a").attr("k", "1").child(elem("b")))
            .child(elem("b").child(elem("a").child(elem("c").value("0"))))
            .child(elem("c"))
            .build()
    }

    const PATHS: [&str; 14] = [
        "*/a",
        "//a[@k = '1']",
        "descendant::b/@k",
        "a/following-sibling::b",
        "nested::a",
        "//*[2]",
        "*/text()",
        "descendant-or-self::node()/c[../@k]",
        "//c/ancestor::*[1]",
        "a[b/@k = '1']",
        "*[c/text()]",
        "//b[.//c = '0']",
        "//*[ancestor::a/@k]",
        "*[following-sibling::c[@k]]",
    ];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn live_results_match_snapshot_evaluation(edits in proptest::collection::vec(edit(), 1..24)) {
            let root = initial();
            let mut live = Vec::new();
            for source in PATHS {
                let path = livepath::compile(source).unwrap();
                let recorder = Arc::new(Recorder::default());
                let handle = path.add_listener(Context::new(&root), recorder.clone()).unwrap();
                live.push((path, recorder, handle));
            }

            for edit in &edits {
                apply(&root, edit);
                for (path, recorder, handle) in &live {
                    let expected: HashSet<PathNode> = path.evaluate(&Context::new(&root)).unwrap().into_iter().collect();
                    let reported: HashSet<PathNode> = recorder.result_nodes().into_iter().collect();
                    let held: HashSet<PathNode> = handle.results().into_iter().collect();
                    prop_assert_eq!(&reported, &expected, "{} after {:?}", path, edit);
                    prop_assert_eq!(&held, &expected, "{} after {:?}", path, edit);
                }
            }

            drop(live);
            prop_assert_eq!(total_observers(&root), 0);
        }
    }
}
