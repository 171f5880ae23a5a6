//! Errors of the forest, the feature extraction and the persistence layer.

error_chain!{
    foreign_links {
        Io(::std::io::Error);
        Serde(::serde_json::Error);
    }

    errors {
        // The ensemble has no slots at all.
        EmptyEnsemble {
            description("the ensemble has no slots")
            display("the ensemble has no slots")
        }
        // A slot was queried which holds no trained tree.
        EmptySlot(index: usize) {
            description("slot holds no trained tree")
            display("slot {} holds no trained tree", index)
        }
        // The label selector does not have one entry per label.
        LabelSelectorMismatch(expected: usize, got: usize) {
            description("label selector length does not match the number of labels")
            display("label selector has {} entries but the forest has {} labels", got, expected)
        }
        // Loading the forest failed for the listed slots. Every other slot was loaded.
        PartialLoad(failed: Vec<usize>) {
            description("some trees could not be loaded")
            display("failed to load the trees of the slots {:?}", failed)
        }
        // Loading the hierarchy failed for the listed slots.
        HierarchyLoad(failed: Vec<usize>) {
            description("the hierarchy could not be loaded into some trees")
            display("failed to load the hierarchy into the slots {:?}", failed)
        }
        OrientationOutOfRange(value: u8, bins: usize) {
            description("orientation value is outside of the histogram range")
            display("orientation {} does not fall into one of the {} bins", value, bins)
        }
        DimensionMismatch(expected: (u32, u32), got: (u32, u32)) {
            description("image dimensions do not match")
            display("expected an image of size {:?}, got {:?}", expected, got)
        }
        UnknownClass(id: usize) {
            description("class id is not part of the class remap table")
            display("class id {} is not part of the class remap table", id)
        }
        EmptyTrainingSet {
            description("no training patches")
            display("the training set does not contain any patch")
        }
        InvalidTree(reason: String) {
            description("invalid tree")
            display("invalid tree: {}", reason)
        }
        InvalidHierarchy(reason: String) {
            description("invalid hierarchy")
            display("invalid hierarchy: {}", reason)
        }
    }
}
