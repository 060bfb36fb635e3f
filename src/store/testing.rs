use super::StorageError;
use super::Store;
use crate::key::ChainAddress;
use crate::key::Pair;
use crate::net::peer::ConnectionDetails;

/// Common behaviour of every [`Store`] backend.
/// Leaves public keys of two nodes in the store.
pub async fn test_store<T: Store>(store: &T) {
    let a = ChainAddress([0xaa; 20]);
    let b = ChainAddress([0xbb; 20]);

    assert_eq!(
        store.get_connection_details(a).await,
        Err(StorageError::NotFound)
    );
    assert_eq!(store.get_node_pub_key(a).await, Err(StorageError::NotFound));

    let details = ConnectionDetails {
        tm_connection: "id@10.0.0.1:26656".into(),
        p2p_connection: "/ip4/10.0.0.1/tcp/1080/p2p/abcd".into(),
    };
    store
        .put_connection_details(a, &details)
        .await
        .expect("Failed to put connection details");

    let key_a = *Pair::generate().public();
    let key_b = *Pair::generate().public();
    store
        .put_node_pub_key(a, key_a)
        .await
        .expect("Failed to put key");
    store
        .put_node_pub_key(b, key_b)
        .await
        .expect("Failed to put key");

    // Keys of the same node do not overwrite each other.
    assert_eq!(
        store.get_connection_details(a).await.unwrap(),
        details,
        "Connection details do not match"
    );
    assert_eq!(store.get_node_pub_key(a).await.unwrap(), key_a);
    assert_eq!(store.get_node_pub_key(b).await.unwrap(), key_b);
    assert_eq!(
        store.get_connection_details(b).await,
        Err(StorageError::NotFound)
    );

    let updated = ConnectionDetails {
        tm_connection: "id@10.0.0.2:26656".into(),
        p2p_connection: "/ip4/10.0.0.2/tcp/1080/p2p/abcd".into(),
    };
    store
        .put_connection_details(a, &updated)
        .await
        .expect("Failed to update connection details");
    assert_eq!(store.get_connection_details(a).await.unwrap(), updated);
    assert_eq!(store.get_node_pub_key(a).await.unwrap(), key_a);
}
