use tern_heap::runtime::string_char_code_at;
use tern_heap::{Heap, HeapConfig, HeapError};
use tern_jit_arm64::assembler::Emitter;
use tern_jit_arm64::{
    Age, BaselineCompiler, CharLoad, CharLoadOptions, CodeAgingHelper, MarkingParity,
    SlowPathCharFetch, StringCharCodeAtGenerator, StringCharLoadGenerator,
    NO_CODE_AGE_SEQUENCE_LENGTH,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_test_writer()
        .try_init();
}

/// Runtime that records how often generated code fell back to it.
struct CountingRuntime {
    heap: Heap,
    slow_calls: usize,
}

impl SlowPathCharFetch for CountingRuntime {
    fn heap(&self) -> &Heap {
        &self.heap
    }

    fn char_code_at(&mut self, string: u64, index: u32) -> Result<Option<u16>, HeapError> {
        self.slow_calls += 1;
        string_char_code_at(&mut self.heap, string, index)
    }
}

#[test]
fn concatenation_falls_back_once_then_stays_fast() {
    init_tracing();
    let mut runtime = CountingRuntime {
        heap: Heap::new(HeapConfig::default()).unwrap(),
        slow_calls: 0,
    };
    let heap = &mut runtime.heap;
    let hello = heap.new_string_from_str("hello ").unwrap();
    let world = heap
        .new_external_two_byte_string(&"w\u{f6}rld".encode_utf16().collect::<Vec<_>>(), false)
        .unwrap();
    let greeting = heap.new_cons_string(hello, world).unwrap();

    let gen = StringCharCodeAtGenerator::new(CharLoadOptions { debug_code: true });
    let expected: Vec<u16> = "hello w\u{f6}rld".encode_utf16().collect();

    // The first access flattens the cons string in place.
    assert_eq!(
        gen.char_code_at(&mut runtime, greeting, 7).unwrap(),
        Some(0xf6)
    );
    assert_eq!(runtime.slow_calls, 1);

    for (i, &unit) in expected.iter().enumerate() {
        assert_eq!(
            gen.char_code_at(&mut runtime, greeting, i as u32).unwrap(),
            Some(unit)
        );
    }
    assert_eq!(runtime.slow_calls, 1);

    // Out-of-range indices never reach either path.
    assert_eq!(
        gen.char_code_at(&mut runtime, greeting, expected.len() as u32)
            .unwrap(),
        None
    );
    assert_eq!(runtime.slow_calls, 1);
}

#[test]
fn slices_of_short_external_strings_always_use_the_runtime() {
    init_tracing();
    let mut runtime = CountingRuntime {
        heap: Heap::new(HeapConfig::default()).unwrap(),
        slow_calls: 0,
    };
    let short = runtime
        .heap
        .new_external_one_byte_string(b"external", true)
        .unwrap();
    let tail = runtime.heap.new_sliced_string(short, 5, 3).unwrap();

    let fast = StringCharLoadGenerator::default();
    assert!(matches!(
        fast.load(&runtime.heap, tail, 0),
        CharLoad::Bail(_)
    ));

    let gen = StringCharCodeAtGenerator::default();
    let loaded: Vec<u16> = (0..3)
        .map(|i| gen.char_code_at(&mut runtime, tail, i).unwrap().unwrap())
        .collect();
    assert_eq!(loaded, "nal".encode_utf16().collect::<Vec<_>>());
    assert_eq!(runtime.slow_calls, 3);
}

#[test]
fn baseline_function_ages_across_marking_cycles() {
    init_tracing();
    let helper = CodeAgingHelper::default();
    let mut code = BaselineCompiler::new().compile(|b| b.ret());
    let body = code.instructions()[NO_CODE_AGE_SEQUENCE_LENGTH..].to_vec();
    let young = *helper.young_sequence();
    assert_eq!(*code.code_age_sequence().unwrap(), young);

    // Three idle cycles make the function old.
    let mut parity = MarkingParity::Odd;
    for _ in 0..3 {
        helper.make_older(code.code_age_sequence_mut().unwrap(), parity);
        parity = parity.opposite();
    }
    let window = code.code_age_sequence().unwrap();
    assert_eq!(helper.get_age(window), Age::Sexagenarian);
    assert!(helper.is_old(window));

    // Running the code-age stub restores the young prologue; the body is untouched.
    helper.make_young(code.code_age_sequence_mut().unwrap());
    assert_eq!(*code.code_age_sequence().unwrap(), young);
    assert_eq!(helper.get_age(code.code_age_sequence().unwrap()), Age::NoAge);
    assert_eq!(&code.instructions()[NO_CODE_AGE_SEQUENCE_LENGTH..], body.as_slice());
}
