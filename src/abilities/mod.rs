//! 能力层：Ability trait、注册表与内置能力

pub mod book;
pub mod files;
pub mod finish;
pub mod lesson_service;
pub mod news;
pub mod pyq;
pub mod registry;
pub mod schema;

pub use book::AskBookAbility;
pub use files::{
    is_file_written, ListFilesAbility, ReadFileAbility, WriteFileAbility, FILE_WRITTEN_MARKER,
};
pub use finish::FinishAbility;
pub use lesson_service::LessonServiceClient;
pub use news::NewsSearchAbility;
pub use pyq::{PyqSearchAbility, QuestionBank};
pub use registry::{Ability, AbilityFailure, AbilityRegistry};
pub use schema::{
    parse_args, AbilityDescriptor, AbilityKind, AbilityOutput, OutputType, ParameterSpec,
    PipedInput, BYTES_TAG, INPUT_ARG,
};
