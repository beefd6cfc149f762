// THEORY:
// The `IdAllocator` is the only owner of identifier state in a run. It is a pure
// counter: the annotation id and the image id start at their configured bases and
// advance together by exactly one per issued pair.
//
// It deliberately knows nothing about the source dataset. Making sure the bases
// sit above every id already in the file is a precondition checked by
// `AugmentConfig::validate_against` before a run starts.

/// One freshly issued `(annotation_id, image_id)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdPair {
    pub annotation_id: u64,
    pub image_id: u64,
}

#[derive(Debug, Clone)]
pub struct IdAllocator {
    next_annotation_id: u64,
    next_image_id: u64,
    issued: u64,
}

impl IdAllocator {
    pub fn new(annotation_base: u64, image_base: u64) -> Self {
        Self {
            next_annotation_id: annotation_base,
            next_image_id: image_base,
            issued: 0,
        }
    }

    /// Issues the next pair and advances both counters.
    pub fn next(&mut self) -> IdPair {
        let pair = IdPair {
            annotation_id: self.next_annotation_id,
            image_id: self.next_image_id,
        };
        self.next_annotation_id += 1;
        self.next_image_id += 1;
        self.issued += 1;
        pair
    }

    /// Number of pairs issued so far.
    pub fn issued(&self) -> u64 {
        self.issued
    }
}
