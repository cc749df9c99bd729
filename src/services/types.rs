use failure::Fail;
use futures::Future;
use futures_cpupool::CpuPool;
use r2d2::{ManageConnection, Pool, PooledConnection};

use super::error::{Error, ErrorKind, ErrorSource};

/// Service layer Future
pub type ServiceFutureV2<T> = Box<Future<Item = T, Error = Error> + Send>;

pub type ServiceResultV2<T> = Result<T, Error>;

/// Runs blocking database work on the cpu pool with a pooled connection
pub fn spawn_on_pool<M, R, Func>(db_pool: Pool<M>, cpu_pool: CpuPool, f: Func) -> ServiceFutureV2<R>
where
    M: ManageConnection,
    Func: FnOnce(PooledConnection<M>) -> Result<R, Error> + Send + 'static,
    R: Send + 'static,
{
    Box::new(cpu_pool.spawn_fn(move || {
        db_pool
            .get()
            .map_err(ectx!(ErrorSource::R2d2, ErrorKind::Unavailable))
            .and_then(f)
    }))
}
