use crate::define_uuid_type;

define_uuid_type!(pub, BufferId);
define_uuid_type!(pub, PassId);
define_uuid_type!(pub, VertexLayoutId);
