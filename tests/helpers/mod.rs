pub mod mock_peer;
