/// Attaches context to an error. Every variant records `file:line` of the call
/// site and the Debug output of the arguments listed after `=>`.
///
/// - `ectx!(err e, ctx1, ctx2 => arg1, arg2)` wraps `e` and converts it with `into()`
/// - `ectx!(try err e, ...)` returns the raw `Context`, to be converted by `?`
/// - `ectx!(convert err e => ...)` takes the kind of `e` and converts it to the local `ErrorKind`
/// - `ectx!(ctx1, ctx2 => ...)`, `ectx!(try ...)`, `ectx!(convert ...)`, `ectx!(try convert ...)`
///   produce closures for `map_err`
#[macro_export]
macro_rules! ectx {
    (err $e:expr $(,$context:expr)* $(=> $($arg:expr),*)*) => {{
        let mut msg = format!("at {}:{}", file!(), line!());
        $(
            $(
                let arg = format!("\nwith args - {}: {:#?}", stringify!($arg), $arg);
                msg.push_str(&arg);
            )*
        )*
        let err = $e.context(msg);
        $(
            let err = err.context($context);
        )*
        err.into()
    }};

    (try err $e:expr $(,$context:expr)* $(=> $($arg:expr),*)*) => {{
        let mut msg = format!("at {}:{}", file!(), line!());
        $(
            $(
                let arg = format!("\nwith args - {}: {:#?}", stringify!($arg), $arg);
                msg.push_str(&arg);
            )*
        )*
        let err = $e.context(msg);
        $(
            let err = err.context($context);
        )*
        err
    }};

    (convert err $e:expr $(=> $($arg:expr),*)*) => {{
        let kind: ErrorKind = $e.kind().into();
        ectx!(err $e, kind $(=> $($arg),*)*)
    }};

    (try convert err $e:expr $(=> $($arg:expr),*)*) => {{
        let kind: ErrorKind = $e.kind().into();
        ectx!(try err $e, kind $(=> $($arg),*)*)
    }};

    (convert $(=> $($arg:expr),*)*) => {{
        move |e| ectx!(convert err e $(=> $($arg),*)*)
    }};

    (try convert $(=> $($arg:expr),*)*) => {{
        move |e| ectx!(try convert err e $(=> $($arg),*)*)
    }};

    (try $($context:expr),* $(=> $($arg:expr),*)*) => {{
        move |e| ectx!(try err e $(,$context)* $(=> $($arg),*)*)
    }};

    ($($context:expr),* $(=> $($arg:expr),*)*) => {{
        move |e| ectx!(err e $(,$context)* $(=> $($arg),*)*)
    }};
}

/// Implements `Fail`, `Display`, `kind()` and the `From` conversions for a layer's
/// `Error { inner: Context<ErrorKind> }`.
#[macro_export]
macro_rules! derive_error_impls {
    () => {
        impl Fail for Error {
            fn cause(&self) -> Option<&Fail> {
                self.inner.cause()
            }

            fn backtrace(&self) -> Option<&Backtrace> {
                self.inner.backtrace()
            }
        }

        impl Error {
            #[allow(dead_code)]
            pub fn kind(&self) -> ErrorKind {
                self.inner.get_context().clone()
            }
        }

        impl fmt::Display for Error {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                fmt::Display::fmt(&self.inner, f)
            }
        }

        impl From<ErrorKind> for Error {
            fn from(kind: ErrorKind) -> Error {
                Error {
                    inner: Context::new(kind),
                }
            }
        }

        impl From<Context<ErrorKind>> for Error {
            fn from(inner: Context<ErrorKind>) -> Error {
                Error { inner }
            }
        }
    };
}

/// `FromSql` / `ToSql` for a single-field newtype over a type diesel already maps.
#[macro_export]
macro_rules! newtype_from_to_sql {
    ($sql_type:ty, $type:ident, $constructor_expr:expr) => {
        impl ::diesel::deserialize::FromSql<$sql_type, ::diesel::pg::Pg> for $type {
            fn from_sql(data: Option<&[u8]>) -> ::diesel::deserialize::Result<Self> {
                ::diesel::deserialize::FromSql::<$sql_type, ::diesel::pg::Pg>::from_sql(data).map($constructor_expr)
            }
        }

        impl ::diesel::serialize::ToSql<$sql_type, ::diesel::pg::Pg> for $type {
            fn to_sql<W: ::std::io::Write>(&self, out: &mut ::diesel::serialize::Output<W, ::diesel::pg::Pg>) -> ::diesel::serialize::Result {
                ::diesel::serialize::ToSql::<$sql_type, ::diesel::pg::Pg>::to_sql(&self.0, out)
            }
        }
    };
}

/// Stores a closed enum as `VARCHAR`. The type must provide `as_str()` and a `FromStr` impl.
#[macro_export]
macro_rules! varchar_enum_sql {
    ($type:ident) => {
        impl ::diesel::deserialize::FromSql<::diesel::sql_types::VarChar, ::diesel::pg::Pg> for $type {
            fn from_sql(data: Option<&[u8]>) -> ::diesel::deserialize::Result<Self> {
                let value = <String as ::diesel::deserialize::FromSql<::diesel::sql_types::VarChar, ::diesel::pg::Pg>>::from_sql(data)?;
                value
                    .parse::<$type>()
                    .map_err(|_| format!("Unrecognized enum variant for {}: {:?}", stringify!($type), value).into())
            }
        }

        impl ::diesel::serialize::ToSql<::diesel::sql_types::VarChar, ::diesel::pg::Pg> for $type {
            fn to_sql<W: ::std::io::Write>(&self, out: &mut ::diesel::serialize::Output<W, ::diesel::pg::Pg>) -> ::diesel::serialize::Result {
                ::std::io::Write::write_all(out, self.as_str().as_bytes())?;
                Ok(::diesel::serialize::IsNull::No)
            }
        }

        impl ::std::fmt::Display for $type {
            fn fmt(&self, f: &mut ::std::fmt::Formatter) -> ::std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}
