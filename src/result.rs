use {
    crate::{error::EtcdError, Revision},
    serde::Deserialize,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Action {
    Get,
    Set,
    Create,
    Update,
    Delete,
    Expire,
    CompareAndSwap,
    CompareAndDelete,
}

///
/// One node of the etcd key space.
///
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Empty for the root node, which the store sends without a key.
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
    #[serde(default)]
    pub dir: bool,
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(default)]
    pub expiration: Option<String>,
    #[serde(default)]
    pub created_index: Revision,
    #[serde(default)]
    pub modified_index: Revision,
    #[serde(default)]
    pub nodes: Vec<Node>,
}

impl Node {
    pub fn children(&self) -> &[Node] {
        &self.nodes
    }

    ///
    /// Depth-first iterator over every node that has no children, itself included when childless.
    ///
    pub fn leaves(&self) -> Leaves<'_> {
        Leaves { stack: vec![self] }
    }
}

pub struct Leaves<'a> {
    stack: Vec<&'a Node>,
}

impl<'a> Iterator for Leaves<'a> {
    type Item = &'a Node;

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(node) = self.stack.pop() {
            if node.nodes.is_empty() {
                return Some(node);
            }
            self.stack.extend(node.nodes.iter().rev());
        }
        None
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireResult {
    action: Action,
    node: Node,
    #[serde(default)]
    prev_node: Option<Node>,
}

///
/// The outcome of a single key-space operation.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtcdResult {
    pub action: Action,
    pub node: Node,
    /// Node state before a mutating operation.
    pub prev_node: Option<Node>,
    /// The store answered `201 Created`.
    pub new_key: bool,
    /// `X-Etcd-Index` at the time of the response.
    pub etcd_index: Revision,
    pub raft_index: u64,
    pub raft_term: u64,
}

impl EtcdResult {
    pub fn from_json(body: &[u8]) -> Result<Self, EtcdError> {
        let wire: WireResult = serde_json::from_slice(body)?;
        Ok(Self {
            action: wire.action,
            node: wire.node,
            prev_node: wire.prev_node,
            new_key: false,
            etcd_index: 0,
            raft_index: 0,
            raft_term: 0,
        })
    }

    pub fn key(&self) -> &str {
        &self.node.key
    }

    pub fn value(&self) -> Option<&str> {
        self.node.value.as_deref()
    }

    pub fn is_dir(&self) -> bool {
        self.node.dir
    }

    pub fn ttl(&self) -> Option<i64> {
        self.node.ttl
    }

    pub fn created_index(&self) -> Revision {
        self.node.created_index
    }

    pub fn modified_index(&self) -> Revision {
        self.node.modified_index
    }

    pub fn children(&self) -> &[Node] {
        self.node.children()
    }

    pub fn previous(&self) -> Option<&Node> {
        self.prev_node.as_ref()
    }

    pub fn leaves(&self) -> Leaves<'_> {
        self.node.leaves()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_key_has_no_children() {
        let body = br#"{"action":"get","node":{"createdIndex":190,"key":"/testkey","modifiedIndex":190,"value":"test"}}"#;
        let result = EtcdResult::from_json(body).expect("parse");
        assert_eq!(result.action, Action::Get);
        assert_eq!(result.key(), "/testkey");
        assert_eq!(result.value(), Some("test"));
        assert!(result.children().is_empty());
        assert_eq!(
            result.leaves().map(|n| n.key.as_str()).collect::<Vec<_>>(),
            vec!["/testkey"]
        );
    }

    #[test]
    fn leaves_should_walk_grand_children_in_order() {
        let body = br#"{
            "action": "get",
            "node": {
                "key": "/testkey", "dir": true, "createdIndex": 190, "modifiedIndex": 190,
                "nodes": [
                    {"key": "/testkey/one", "dir": true, "createdIndex": 191, "modifiedIndex": 191,
                     "nodes": [{"key": "/testkey/one/grand", "value": "g", "createdIndex": 193, "modifiedIndex": 193}]},
                    {"key": "/testkey/two", "value": "t", "createdIndex": 192, "modifiedIndex": 192},
                    {"key": "/testkey/empty", "dir": true, "createdIndex": 194, "modifiedIndex": 194}
                ]
            }
        }"#;
        let result = EtcdResult::from_json(body).expect("parse");
        assert!(result.is_dir());
        assert_eq!(result.children().len(), 3);
        let leaves: Vec<_> = result.leaves().map(|n| n.key.as_str()).collect();
        assert_eq!(
            leaves,
            vec!["/testkey/one/grand", "/testkey/two", "/testkey/empty"]
        );
    }

    #[test]
    fn it_should_parse_previous_node_and_ignore_unknown_fields() {
        let body = br#"{
            "action": "compareAndSwap",
            "node": {"key": "/k", "value": "new", "ttl": 30, "expiration": "2013-12-04T12:01:21.874888581-08:00",
                     "createdIndex": 8, "modifiedIndex": 9, "somethingElse": 1},
            "prevNode": {"key": "/k", "value": "old", "createdIndex": 8, "modifiedIndex": 8}
        }"#;
        let result = EtcdResult::from_json(body).expect("parse");
        assert_eq!(result.action, Action::CompareAndSwap);
        assert_eq!(result.ttl(), Some(30));
        assert_eq!(result.modified_index(), 9);
        assert_eq!(
            result.previous().and_then(|n| n.value.as_deref()),
            Some("old")
        );
    }

    #[test]
    fn unknown_action_is_rejected() {
        let body = br#"{"action":"teleport","node":{"key":"/k"}}"#;
        assert!(matches!(
            EtcdResult::from_json(body),
            Err(EtcdError::Decode(_))
        ));
    }

    #[test]
    fn root_listing_has_no_key() {
        let body = br#"{
            "action": "get",
            "node": {
                "dir": true,
                "nodes": [
                    {"key": "/_locks", "dir": true, "createdIndex": 3, "modifiedIndex": 3},
                    {"key": "/foo", "value": "bar", "createdIndex": 4, "modifiedIndex": 4}
                ]
            }
        }"#;
        let result = EtcdResult::from_json(body).expect("parse");
        assert!(result.is_dir());
        assert_eq!(result.key(), "");
        assert_eq!(result.modified_index(), 0);
        let keys: Vec<_> = result.children().iter().map(|n| n.key.as_str()).collect();
        assert_eq!(keys, vec!["/_locks", "/foo"]);
    }
}
