use proptest::prelude::*;
use tern_jit_arm64::{
    Age, BaselineCompiler, CodeAgeState, CodeAgingHelper, MarkingParity,
    NO_CODE_AGE_SEQUENCE_LENGTH,
};

fn stub_state_strategy(helper: &CodeAgingHelper) -> impl Strategy<Value = (Age, MarkingParity)> {
    let states: Vec<_> = helper.stubs().iter().map(|s| (s.age, s.parity)).collect();
    prop::sample::select(states)
}

fn cycle_parity() -> impl Strategy<Value = MarkingParity> {
    prop_oneof![Just(MarkingParity::Odd), Just(MarkingParity::Even)]
}

#[test]
fn round_trips_every_stub_state() {
    let helper = CodeAgingHelper::default();
    for stub in helper.stubs().iter() {
        let mut window = *helper.young_sequence();
        helper.patch_platform_code_age(&mut window, stub.age, stub.parity);
        assert_eq!(
            helper.get_code_age_and_parity(&window),
            (stub.age, stub.parity)
        );
        assert_eq!(
            helper.decode(&window),
            CodeAgeState::Aged {
                age: stub.age,
                parity: stub.parity
            }
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 128,
        .. ProptestConfig::default()
    })]

    #[test]
    fn no_age_restores_the_young_prologue_from_anything(
        prior in prop::array::uniform20(any::<u8>()),
    ) {
        let helper = CodeAgingHelper::default();
        let mut window = prior;
        helper.patch_platform_code_age(&mut window, Age::NoAge, MarkingParity::NoParity);
        prop_assert_eq!(&window, helper.young_sequence());
        prop_assert!(helper.is_young(&window));
    }

    #[test]
    fn repatching_is_last_writer_wins(
        states in prop::collection::vec(stub_state_strategy(&CodeAgingHelper::default()), 1..8),
    ) {
        let helper = CodeAgingHelper::default();
        let mut code = BaselineCompiler::new().compile(|_| {});
        let window = code.code_age_sequence_mut().unwrap();
        prop_assert_eq!(window.len(), NO_CODE_AGE_SEQUENCE_LENGTH);
        for &(age, parity) in &states {
            helper.patch_platform_code_age(window, age, parity);
        }
        let last = *states.last().unwrap();
        prop_assert_eq!(helper.get_code_age_and_parity(window), last);
    }

    #[test]
    fn make_older_never_rejuvenates(
        cycles in prop::collection::vec(cycle_parity(), 0..16),
    ) {
        let helper = CodeAgingHelper::default();
        let mut window = *helper.young_sequence();
        let mut previous = helper.get_age(&window);
        for parity in cycles {
            helper.make_older(&mut window, parity);
            let age = helper.get_age(&window);
            prop_assert!(age >= previous);
            prop_assert!(age <= Age::LAST);
            prop_assert!(age.raw() - previous.raw() <= 1);
            previous = age;
        }
    }
}
