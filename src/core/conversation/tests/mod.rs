mod compaction;
mod confirmation;
mod support;
