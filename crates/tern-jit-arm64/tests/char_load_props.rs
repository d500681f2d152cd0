use proptest::prelude::*;
use tern_heap::runtime::flatten_code_units;
use tern_heap::{Heap, HeapConfig, HeapError};
use tern_jit_arm64::string_char_load::resolve;
use tern_jit_arm64::{
    CharLoad, CharLoadOptions, Resolution, StringCharCodeAtGenerator, StringCharLoadGenerator,
};

#[derive(Debug, Clone)]
enum Leaf {
    Seq { units: Vec<u16>, one_byte: bool },
    External { units: Vec<u16>, one_byte: bool, short: bool },
}

#[derive(Debug, Clone)]
enum Recipe {
    Leaf(Leaf),
    /// `Cons(leaf, EMPTY)`.
    FlatCons(Leaf),
    Cons(Box<Recipe>, Box<Recipe>),
    /// Offset and length are reduced modulo the parent's length when building.
    Slice(Box<Recipe>, u32, u32),
}

fn leaf_strategy() -> impl Strategy<Value = Leaf> {
    let units = prop::collection::vec(any::<u16>(), 0..12);
    prop_oneof![
        (units.clone(), any::<bool>()).prop_map(|(units, one_byte)| Leaf::Seq { units, one_byte }),
        (units, any::<bool>(), any::<bool>()).prop_map(|(units, one_byte, short)| {
            Leaf::External {
                units,
                one_byte,
                short,
            }
        }),
    ]
}

fn recipe_strategy() -> impl Strategy<Value = Recipe> {
    let leaf = prop_oneof![
        leaf_strategy().prop_map(Recipe::Leaf),
        leaf_strategy().prop_map(Recipe::FlatCons),
    ];
    leaf.prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone())
                .prop_map(|(a, b)| Recipe::Cons(Box::new(a), Box::new(b))),
            (inner, any::<u32>(), any::<u32>())
                .prop_map(|(parent, off, len)| Recipe::Slice(Box::new(parent), off, len)),
        ]
    })
}

fn leaf_is_loadable(leaf: &Leaf) -> bool {
    match leaf {
        Leaf::Seq { .. } => true,
        Leaf::External { short, .. } => !short,
    }
}

/// Whether the direct string a slice of `recipe` ends up pointing at can be loaded inline.
fn slice_target_is_loadable(recipe: &Recipe) -> bool {
    match recipe {
        Recipe::Leaf(leaf) | Recipe::FlatCons(leaf) => leaf_is_loadable(leaf),
        // Slicing flattens the cons first, leaving a fresh sequential string.
        Recipe::Cons(..) => true,
        Recipe::Slice(parent, ..) => slice_target_is_loadable(parent),
    }
}

/// Whether the fast path must resolve every index of the string built from `recipe`.
fn is_loadable(recipe: &Recipe) -> bool {
    match recipe {
        Recipe::Leaf(leaf) | Recipe::FlatCons(leaf) => leaf_is_loadable(leaf),
        // The second half is never the canonical empty string.
        Recipe::Cons(..) => false,
        Recipe::Slice(parent, ..) => slice_target_is_loadable(parent),
    }
}

fn narrow(units: &[u16]) -> Vec<u8> {
    units.iter().map(|&u| u as u8).collect()
}

fn build_leaf(heap: &mut Heap, leaf: &Leaf) -> Result<u64, HeapError> {
    match leaf {
        Leaf::Seq {
            units,
            one_byte: true,
        } => heap.new_one_byte_string(&narrow(units)),
        Leaf::Seq {
            units,
            one_byte: false,
        } => heap.new_two_byte_string(units),
        Leaf::External {
            units,
            one_byte: true,
            short,
        } => heap.new_external_one_byte_string(&narrow(units), *short),
        Leaf::External {
            units,
            one_byte: false,
            short,
        } => heap.new_external_two_byte_string(units, *short),
    }
}

fn build(heap: &mut Heap, recipe: &Recipe) -> Result<u64, HeapError> {
    match recipe {
        Recipe::Leaf(leaf) => build_leaf(heap, leaf),
        Recipe::FlatCons(leaf) => {
            let first = build_leaf(heap, leaf)?;
            let empty = heap.empty_string();
            heap.new_cons_string(first, empty)
        }
        Recipe::Cons(a, b) => {
            let first = build(heap, a)?;
            let second = build(heap, b)?;
            heap.new_cons_string(first, second)
        }
        Recipe::Slice(parent, off, len) => {
            let parent = build(heap, parent)?;
            let parent_len = heap.length_of(parent);
            let offset = off % (parent_len + 1);
            let length = len % (parent_len - offset + 1);
            match heap.new_sliced_string(parent, offset, length) {
                Err(HeapError::UnflattenedSliceParent { .. }) => {
                    heap.flatten(parent)?;
                    heap.new_sliced_string(parent, offset, length)
                }
                other => other,
            }
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]

    #[test]
    fn fast_path_agrees_with_flattening(recipe in recipe_strategy()) {
        let mut heap = Heap::new(HeapConfig::default()).unwrap();
        let string = build(&mut heap, &recipe).unwrap();
        let expected = flatten_code_units(&heap, string).unwrap();
        prop_assert_eq!(expected.len() as u32, heap.length_of(string));

        let loadable = is_loadable(&recipe);
        let options = CharLoadOptions { debug_code: true };
        let fast = StringCharLoadGenerator::new(options.clone());
        for (i, &unit) in expected.iter().enumerate() {
            let index = i as u32;
            match resolve(&heap, string, index, &options) {
                Resolution::Resolved(terminal) => {
                    prop_assert!(loadable, "index {} resolved but should bail", index);
                    prop_assert!(terminal.indirections <= 1);
                    prop_assert!(!heap.shape_of(terminal.string).is_indirect());
                }
                Resolution::Bail(reason) => {
                    prop_assert!(!loadable, "index {} bailed with {:?}", index, reason);
                }
            }
            match fast.load(&heap, string, index) {
                CharLoad::Loaded(loaded) => prop_assert_eq!(loaded, unit, "index {}", index),
                CharLoad::Bail(_) => prop_assert!(!loadable),
            }
        }

        // Slow-path fallbacks may flatten in place; the characters must not change.
        let char_code_at = StringCharCodeAtGenerator::new(options);
        for (i, &unit) in expected.iter().enumerate() {
            prop_assert_eq!(
                char_code_at.char_code_at(&mut heap, string, i as u32).unwrap(),
                Some(unit)
            );
        }
        prop_assert_eq!(
            char_code_at.char_code_at(&mut heap, string, expected.len() as u32).unwrap(),
            None
        );
        prop_assert_eq!(flatten_code_units(&heap, string).unwrap(), expected);
    }
}
