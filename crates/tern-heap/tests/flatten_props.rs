use proptest::prelude::*;
use tern_heap::runtime::{flatten_code_units, string_char_code_at};
use tern_heap::{Heap, HeapConfig, StringValue};

#[derive(Debug, Clone)]
enum Tree {
    Leaf(Vec<u16>),
    Concat(Box<Tree>, Box<Tree>),
}

fn tree_strategy() -> impl Strategy<Value = Tree> {
    let leaf = prop::collection::vec(prop_oneof![0u16..0x80, any::<u16>()], 0..8).prop_map(Tree::Leaf);
    leaf.prop_recursive(5, 32, 2, |inner| {
        (inner.clone(), inner).prop_map(|(a, b)| Tree::Concat(Box::new(a), Box::new(b)))
    })
}

/// Builds `tree` as nested cons strings and returns it with its expected code units.
fn build(heap: &mut Heap, tree: &Tree) -> (u64, Vec<u16>) {
    match tree {
        Tree::Leaf(units) => (heap.new_string_from_code_units(units).unwrap(), units.clone()),
        Tree::Concat(a, b) => {
            let (first, mut units) = build(heap, a);
            let (second, tail) = build(heap, b);
            units.extend(tail);
            (heap.new_cons_string(first, second).unwrap(), units)
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn flattening_preserves_characters(tree in tree_strategy()) {
        let mut heap = Heap::new(HeapConfig::default()).unwrap();
        let (string, expected) = build(&mut heap, &tree);
        prop_assert_eq!(&flatten_code_units(&heap, string).unwrap(), &expected);

        let flat = heap.flatten(string).unwrap();
        prop_assert!(!heap.shape_of(flat).is_indirect());
        prop_assert_eq!(&flatten_code_units(&heap, string).unwrap(), &expected);
        if let StringValue::Cons { first, second, .. } = heap.string_value(string).unwrap() {
            prop_assert_eq!(first, flat);
            prop_assert_eq!(second, heap.empty_string());
        }

        for (i, &unit) in expected.iter().enumerate() {
            prop_assert_eq!(string_char_code_at(&mut heap, string, i as u32).unwrap(), Some(unit));
        }
    }

    #[test]
    fn slices_read_through_to_their_parent(
        units in prop::collection::vec(any::<u16>(), 1..24),
        a in any::<u32>(),
        b in any::<u32>(),
    ) {
        let mut heap = Heap::new(HeapConfig::default()).unwrap();
        let parent = heap.new_string_from_code_units(&units).unwrap();
        let len = units.len() as u32;
        let offset = a % len;
        let length = b % (len - offset + 1);
        let outer = heap.new_sliced_string(parent, offset, length).unwrap();
        let inner_offset = if length == 0 { 0 } else { a % length };
        let inner = heap.new_sliced_string(outer, inner_offset, length - inner_offset).unwrap();

        prop_assert_eq!(heap.sliced_parent(inner), parent);
        let start = (offset + inner_offset) as usize;
        prop_assert_eq!(
            flatten_code_units(&heap, inner).unwrap(),
            units[start..start + (length - inner_offset) as usize].to_vec()
        );
    }
}
