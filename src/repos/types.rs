use repos::Error as RepoError;

pub type RepoResultV2<T> = Result<T, RepoError>;
