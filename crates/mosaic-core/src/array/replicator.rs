//! All-to-all tile replication
//!
//! The replicator turns a distributed array into a replicated one: every
//! rank walks its local non-zero tiles and broadcasts each to all peers,
//! which install the copy into their replicated destination. Completion is
//! synchronized by the fence issued from
//! [`DistArray::make_replicated`](super::DistArray::make_replicated).

use std::sync::Arc;

use tracing::error;

use mosaic_runtime::{ObjectId, ObjectLookup, World};

use crate::error::Result;
use crate::tensor::{Scalar, TileValue};

use super::ArrayImpl;

/// Install `value` as tile `ord` of the array `peer` registered under `id`.
///
/// The installation runs on the peer's task queue; deliveries from one rank
/// arrive in submission order. If the peer has not yet constructed its
/// implementation the delivery re-enqueues itself.
pub(crate) fn deliver_tile<T: Scalar>(
    world: World,
    peer: usize,
    id: ObjectId,
    ord: usize,
    value: TileValue<T>,
) {
    let task_world = world.clone();
    world.taskq_of(peer).submit(move || {
        match task_world.find_object(peer, id) {
            ObjectLookup::Found(object) => {
                let pimpl = object
                    .downcast::<ArrayImpl<T>>()
                    .unwrap_or_else(|_| panic!("object {id} is not an array of this element type"));
                if let Err(failure) = pimpl.set(ord, value, false) {
                    error!(peer, %id, ord, %failure, "tile delivery rejected");
                }
            }
            ObjectLookup::Pending => {
                // Peer has not constructed the array yet; retry shortly.
                std::thread::sleep(std::time::Duration::from_millis(1));
                deliver_tile::<T>(task_world, peer, id, ord, value);
            }
            ObjectLookup::Retired => {
                error!(peer, %id, ord, "tile delivery to a destroyed array dropped");
            }
        }
    });
}

/// Broadcast every local non-zero tile of `source` into `dest`, which must
/// be a replicated array with identical metadata.
pub(crate) fn replicate<T: Scalar>(source: &Arc<ArrayImpl<T>>, dest: &Arc<ArrayImpl<T>>) -> Result<()> {
    let world = source.world().clone();
    let rank = world.rank();
    let size = world.size();
    let dest_id = dest.id();

    for ord in source.local_nonzero() {
        let tile = source.local_future(ord);
        let reader = tile.clone();
        let world = world.clone();
        let dest = Arc::clone(dest);
        tile.register_callback(move || match reader.get() {
            Ok(value) => {
                let shared = value.into_shared();
                for peer in 0..size {
                    if peer == rank {
                        if let Err(failure) = dest.set(ord, shared.clone(), false) {
                            error!(rank, ord, %failure, "replicated tile rejected locally");
                        }
                    } else {
                        deliver_tile::<T>(world.clone(), peer, dest_id, ord, shared.clone());
                    }
                }
            }
            Err(failure) => {
                error!(rank, ord, %failure, "source tile failed during replication");
            }
        });
    }
    Ok(())
}
