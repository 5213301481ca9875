use chromtrain::{ChromosomeSet, FoldSplitter, TrainingError};

#[test]
fn fold_zero_matches_canonical_partition() {
    let splitter = FoldSplitter::autosomal();
    let split = splitter.split(0).unwrap();

    let expected_train: ChromosomeSet = (1..=18).collect();
    let expected_val: ChromosomeSet = [19, 20].into_iter().collect();
    let expected_test: ChromosomeSet = [21, 22].into_iter().collect();

    assert_eq!(split.train, expected_train);
    assert_eq!(split.val, expected_val);
    assert_eq!(split.test, expected_test);
}

#[test]
fn all_folds_are_disjoint_and_cover_the_universe() {
    let splitter = FoldSplitter::autosomal();
    for fold in 0..splitter.fold_count() {
        let split = splitter.split(fold).unwrap();

        assert!(
            split.train.is_disjoint(&split.val),
            "fold {fold}: train and val overlap"
        );
        assert!(
            split.train.is_disjoint(&split.test),
            "fold {fold}: train and test overlap"
        );
        assert!(
            split.val.is_disjoint(&split.test),
            "fold {fold}: val and test overlap"
        );

        let mut union = split.train.clone();
        union.extend(&split.val);
        union.extend(&split.test);
        assert_eq!(
            &union,
            splitter.universe(),
            "fold {fold}: partition does not cover the universe"
        );
    }
}

#[test]
fn splitting_is_deterministic() {
    let splitter = FoldSplitter::autosomal();
    for fold in 0..splitter.fold_count() {
        assert_eq!(splitter.split(fold).unwrap(), splitter.split(fold).unwrap());
    }
}

#[test]
fn unknown_fold_is_a_configuration_error() {
    let splitter = FoldSplitter::autosomal();
    let err = splitter.split(splitter.fold_count()).unwrap_err();
    assert!(matches!(err, TrainingError::Configuration(_)));
    assert!(err.to_string().contains("unknown training fold"));
}
